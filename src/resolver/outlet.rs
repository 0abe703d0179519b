use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::types::FixReport;

/// 输出求解结果
pub async fn save(config: &Config, report: &FixReport) -> Result<()> {
    StdoutOutlet.save(report).await?;
    if let Some(path) = &config.output_path {
        RequirementsFileOutlet::new(path).save(report).await?;
    }
    Ok(())
}

pub trait Outlet {
    async fn save(&self, report: &FixReport) -> Result<()>;
}

/// 结果和说明写到stdout，日志走stderr
pub struct StdoutOutlet;

impl Outlet for StdoutOutlet {
    async fn save(&self, report: &FixReport) -> Result<()> {
        println!("{}", render_report(report));
        Ok(())
    }
}

pub struct RequirementsFileOutlet {
    path: PathBuf,
}

impl RequirementsFileOutlet {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl Outlet for RequirementsFileOutlet {
    async fn save(&self, report: &FixReport) -> Result<()> {
        if report.candidate.is_empty() {
            tracing::warn!("⚠️ 没有可写入的requirements内容，跳过 {}", self.path.display());
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let mut content = report.candidate.raw.trim().to_string();
        content.push('\n');
        tokio::fs::write(&self.path, content)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        tracing::info!("💾 requirements已写入 {}", self.path.display());
        Ok(())
    }
}

/// 面向用户的结果文本
pub fn render_report(report: &FixReport) -> String {
    let mut out = String::new();
    let status = if report.is_verified() {
        "✅ Verified"
    } else {
        "⚠️ Best effort (verification cap reached)"
    };
    out.push_str(&format!("# Package Doctor: {}\n", status));
    out.push_str(&format!(
        "Session: {}  Iterations: {}\n\n",
        report.session_id, report.iterations
    ));

    if !report.candidate.explanation.is_empty() {
        out.push_str("## Explanation\n");
        out.push_str(report.candidate.explanation.trim());
        out.push_str("\n\n");
    }

    out.push_str("## requirements.txt\n```requirements\n");
    out.push_str(report.candidate.raw.trim());
    out.push_str("\n```\n");

    if !report.issues.is_empty() {
        out.push_str("\n## Outstanding issues\n");
        for issue in &report.issues {
            out.push_str(&format!("- {}\n", issue));
        }
    }

    if !report.findings.is_empty() {
        out.push_str("\n## Sources\n");
        for finding in &report.findings {
            out.push_str(&format!("- {}\n", finding.url));
        }
    }

    let warnings = report.warnings();
    if !warnings.is_empty() {
        out.push_str("\n## Warnings\n");
        for warning in warnings {
            out.push_str(&format!("- {}\n", warning));
        }
    }
    out
}
