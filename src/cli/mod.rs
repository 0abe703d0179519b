use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::io::{BufRead, IsTerminal, Read};
use std::path::{Path, PathBuf};

use crate::config::{Config, CrawlBackend, LLMProvider};
use crate::resolver::ResolveRequest;
use crate::types::ErrorReport;

/// 未指定 --config 时尝试加载的配置文件
pub const DEFAULT_CONFIG_FILE: &str = "package-doctor.toml";

/// package-doctor - 由LLM驱动的Python依赖冲突诊断与修复工具
#[derive(Parser, Debug, Clone)]
#[command(name = "package-doctor")]
#[command(
    about = "Diagnoses Python dependency conflicts from an error log, researches official docs and community threads, and proposes a verified requirements.txt."
)]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// 配置文件路径
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// 错误日志或问题描述
    #[arg(short, long)]
    pub error: Option<String>,

    /// 从文件读取错误日志
    #[arg(long)]
    pub error_file: Option<PathBuf>,

    /// 当前的requirements：文件路径，或以逗号/换行分隔的包列表
    #[arg(short, long)]
    pub requirements: Option<String>,

    /// 修复后的requirements输出路径
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// 续接已有会话
    #[arg(long)]
    pub session_id: Option<String>,

    /// 修复循环的最大轮数
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// 检索类Agent的Provider (openai, openrouter, anthropic, gemini, ollama)
    #[arg(long)]
    pub research_provider: Option<String>,

    #[arg(long)]
    pub research_model: Option<String>,

    /// 推理类Agent的Provider
    #[arg(long)]
    pub reasoning_provider: Option<String>,

    #[arg(long)]
    pub reasoning_model: Option<String>,

    /// 爬取服务 (crawl4ai, firecrawl)
    #[arg(long)]
    pub crawl_backend: Option<String>,

    /// 会话存储地址：sqlite://<path> 或 memory
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// 启用LLM响应缓存
    #[arg(long)]
    pub cache: bool,

    /// 是否启用详细日志
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// 求解一次依赖冲突（默认）
    Run,
    /// 启动Web服务：开发者界面 + MCP端点
    Serve {
        /// 监听地址，例如 0.0.0.0:7860
        #[arg(long)]
        bind: Option<String>,
    },
    /// 列出已保存的会话
    Sessions,
}

impl Args {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }

    /// 将CLI参数转换为配置
    pub fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(config_path) => Config::from_file(config_path)?,
            None => {
                let default_config_path = std::env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join(DEFAULT_CONFIG_FILE);
                if default_config_path.exists() {
                    Config::from_file(&default_config_path)?
                } else {
                    Config::default()
                }
            }
        };

        // 覆盖模型配置
        if let Some(provider) = parse_provider(self.research_provider.as_deref()) {
            config.llm.research.provider = provider;
        }
        if let Some(model) = self.research_model {
            config.llm.research.model = model;
        }
        if let Some(provider) = parse_provider(self.reasoning_provider.as_deref()) {
            config.llm.reasoning.provider = provider;
        }
        if let Some(model) = self.reasoning_model {
            config.llm.reasoning.model = model;
        }

        if let Some(backend_str) = self.crawl_backend {
            match backend_str.parse::<CrawlBackend>() {
                Ok(backend) => config.crawl.backend = backend,
                Err(_) => tracing::warn!(
                    "⚠️ 警告: 未知的爬取服务: {}，使用默认配置",
                    backend_str
                ),
            }
        }

        if let Some(max_iterations) = self.max_iterations {
            config.resolver.max_fix_iterations = max_iterations.max(1);
        }
        if let Some(database_url) = self.database_url {
            config.session.database_url = database_url;
        }
        if let Some(Command::Serve {
            bind: Some(bind), ..
        }) = &self.command
        {
            config.server.bind = bind.clone();
        }
        if self.output.is_some() {
            config.output_path = self.output;
        }
        if self.cache {
            config.cache.enabled = true;
        }
        config.verbose = config.verbose || self.verbose;

        Ok(config)
    }

    /// 读取错误报告：参数 → 非终端stdin → 交互式输入
    pub fn resolve_request(&self) -> Result<ResolveRequest> {
        let stdin = std::io::stdin();
        let interactive = stdin.is_terminal();
        let report = self.error_report_from(stdin.lock(), interactive)?;
        Ok(ResolveRequest::new(report).with_session_id(self.session_id.clone()))
    }

    pub fn error_report_from<R: BufRead>(&self, mut input: R, interactive: bool) -> Result<ErrorReport> {
        let mut requirements = self.requirements_content()?;

        let text = if let Some(error) = &self.error {
            error.clone()
        } else if let Some(path) = &self.error_file {
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read error file {}", path.display()))?
        } else if !interactive {
            let mut text = String::new();
            input
                .read_to_string(&mut text)
                .context("Failed to read error report from stdin")?;
            text
        } else {
            eprintln!("📋 Paste the error log, then press Enter on an empty line:");
            let text = read_until_blank(&mut input)?;
            if requirements.is_none() {
                eprintln!("📦 Paste your requirements.txt (optional), empty line to finish:");
                requirements = Some(read_until_blank(&mut input)?);
            }
            text
        };

        if text.trim().is_empty() {
            bail!("Error report is empty; pass --error, --error-file or pipe it on stdin");
        }
        Ok(ErrorReport::new(text.trim(), requirements))
    }

    /// `--requirements` 指向存在的文件时读取文件，否则按包列表处理
    fn requirements_content(&self) -> Result<Option<String>> {
        let Some(value) = &self.requirements else {
            return Ok(None);
        };
        let path = Path::new(value);
        if path.is_file() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read requirements file {}", path.display()))?;
            return Ok(Some(content));
        }
        let list = value
            .split([',', '\n'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        Ok(Some(list))
    }
}

fn parse_provider(value: Option<&str>) -> Option<LLMProvider> {
    let value = value?;
    match value.parse::<LLMProvider>() {
        Ok(provider) => Some(provider),
        Err(_) => {
            tracing::warn!("⚠️ 警告: 未知的provider: {}，使用默认provider", value);
            None
        }
    }
}

/// 逐行读取直到空行或输入结束
fn read_until_blank<R: BufRead>(input: &mut R) -> Result<String> {
    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            break;
        }
        lines.push(line.to_string());
    }
    Ok(lines.join("\n"))
}
