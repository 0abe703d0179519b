use serde::{Deserialize, Serialize};

use super::{CandidateFix, Finding, FixStatus};

/// 用户提交的错误报告
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// 错误日志或问题描述
    pub text: String,
    /// 当前的requirements.txt内容（可选）
    #[serde(default)]
    pub requirements: Option<String>,
}

impl ErrorReport {
    pub fn new(text: impl Into<String>, requirements: Option<String>) -> Self {
        Self {
            text: text.into(),
            requirements: requirements.filter(|r| !r.trim().is_empty()),
        }
    }

    /// 格式化为 Query Creator 的输入
    pub fn to_prompt(&self) -> String {
        let mut prompt = String::new();
        prompt.push_str("## Error report\n");
        prompt.push_str(self.text.trim());
        prompt.push_str("\n\n");
        if let Some(requirements) = &self.requirements {
            prompt.push_str("## Current requirements.txt\n```requirements\n");
            prompt.push_str(requirements.trim());
            prompt.push_str("\n```\n");
        }
        prompt
    }
}

/// 一次完整求解的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixReport {
    pub session_id: String,
    pub status: FixStatus,
    /// 最后一个候选方案（验证通过或达到上限时的最后一版）
    pub candidate: CandidateFix,
    /// 最后一轮验证发现的问题
    pub issues: Vec<String>,
    /// 实际执行的修复轮数
    pub iterations: usize,
    pub findings: Vec<Finding>,
    /// 爬取阶段降级之后仍然没有拿到可用资料
    pub no_authoritative_source: bool,
}

impl FixReport {
    pub fn is_verified(&self) -> bool {
        self.status.is_verified()
    }

    /// 面向用户的告警信息
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.no_authoritative_source {
            warnings.push("No authoritative source found; the fix relies on model knowledge only.".to_string());
        }
        if !self.is_verified() {
            warnings.push(format!(
                "Verification did not pass after {} iteration(s); returning the last candidate as a best-effort result.",
                self.iterations
            ));
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_report_prompt() {
        let report = ErrorReport::new(
            "DeprecationWarning: `regex` is deprecated, use `pattern`",
            Some("pydantic==1.10.2\nfastapi==0.95.0\n".to_string()),
        );
        let prompt = report.to_prompt();
        assert!(prompt.starts_with("## Error report\nDeprecationWarning"));
        assert!(prompt.contains("```requirements\npydantic==1.10.2\nfastapi==0.95.0\n```"));
    }

    #[test]
    fn test_error_report_blank_requirements_dropped() {
        let report = ErrorReport::new("boom", Some("   \n".to_string()));
        assert!(report.requirements.is_none());
        assert!(!report.to_prompt().contains("requirements.txt"));
    }

    #[test]
    fn test_warnings() {
        let report = FixReport {
            session_id: "s".to_string(),
            status: FixStatus::CapExceeded,
            candidate: CandidateFix::default(),
            issues: vec!["Invalid syntax: numpy=>1".to_string()],
            iterations: 3,
            findings: vec![],
            no_authoritative_source: true,
        };
        let warnings = report.warnings();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[1].contains("3 iteration(s)"));
    }
}
