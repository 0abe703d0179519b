use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::ResolverError;

/// LLM Provider类型
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub enum LLMProvider {
    #[serde(rename = "openai")]
    OpenAI,
    #[serde(rename = "openrouter")]
    #[default]
    OpenRouter,
    #[serde(rename = "gemini")]
    Gemini,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "ollama")]
    Ollama,
}

impl std::fmt::Display for LLMProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LLMProvider::OpenAI => write!(f, "openai"),
            LLMProvider::OpenRouter => write!(f, "openrouter"),
            LLMProvider::Gemini => write!(f, "gemini"),
            LLMProvider::Anthropic => write!(f, "anthropic"),
            LLMProvider::Ollama => write!(f, "ollama"),
        }
    }
}

impl std::str::FromStr for LLMProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(LLMProvider::OpenAI),
            "openrouter" => Ok(LLMProvider::OpenRouter),
            "gemini" | "google" => Ok(LLMProvider::Gemini),
            "anthropic" => Ok(LLMProvider::Anthropic),
            "ollama" => Ok(LLMProvider::Ollama),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

/// 爬取服务类型
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub enum CrawlBackend {
    #[serde(rename = "crawl4ai")]
    #[default]
    Crawl4Ai,
    #[serde(rename = "firecrawl")]
    Firecrawl,
}

impl std::str::FromStr for CrawlBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "crawl4ai" => Ok(CrawlBackend::Crawl4Ai),
            "firecrawl" => Ok(CrawlBackend::Firecrawl),
            _ => Err(format!("Unknown crawl backend: {}", s)),
        }
    }
}

/// 应用程序配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct Config {
    /// 会话存储中的应用名
    pub app_name: String,

    /// 会话所属用户
    pub user_id: String,

    /// LLM模型配置
    pub llm: LLMConfig,

    /// 爬取配置
    pub crawl: CrawlConfig,

    /// 搜索配置
    pub search: SearchConfig,

    /// 长期记忆配置
    pub memory: MemoryConfig,

    /// 会话存储配置
    pub session: SessionConfig,

    /// 缓存配置
    pub cache: CacheConfig,

    /// 求解流程配置
    pub resolver: ResolverConfig,

    /// Web服务配置
    pub server: ServerConfig,

    /// 修复后的requirements输出路径，为空时只输出到stdout
    pub output_path: Option<PathBuf>,

    /// 是否启用详细日志
    pub verbose: bool,
}

/// 单个模型端点
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ModelEndpoint {
    /// LLM Provider类型
    pub provider: LLMProvider,

    /// LLM API KEY
    pub api_key: String,

    /// LLM API基地址，部分provider忽略该配置
    pub api_base_url: String,

    /// 模型名称
    pub model: String,
}

/// LLM模型配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LLMConfig {
    /// 检索类Agent（Query Creator、两个Search Agent）使用的模型
    pub research: ModelEndpoint,

    /// 推理类Agent（Code Surgeon、Verifier）使用的模型
    pub reasoning: ModelEndpoint,

    /// 最大tokens
    pub max_tokens: u32,

    /// 温度
    pub temperature: f64,

    /// 重试次数
    pub retry_attempts: u32,

    /// 重试间隔（毫秒）
    pub retry_delay_ms: u64,

    /// 超时时间（秒）
    pub timeout_seconds: u64,

    /// 带工具对话的最大轮数
    pub max_tool_turns: usize,
}

/// 爬取配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CrawlConfig {
    pub backend: CrawlBackend,

    /// Crawl4AI 服务地址
    pub crawl4ai_base_url: String,

    /// Crawl4AI 服务的访问令牌（可选）
    pub crawl4ai_api_token: Option<String>,

    /// Firecrawl API KEY
    pub firecrawl_api_key: String,

    /// Firecrawl API基地址
    pub firecrawl_base_url: String,

    /// 批量爬取结果被判定为充分的最小文本量
    pub min_total_chars: usize,

    /// 批量爬取中存在失败页面时是否仍可判定为充分
    pub allow_failed_pages: bool,

    /// 是否要求结果中出现版本相关关键词
    pub require_version_keywords: bool,

    /// 自适应爬取的最大页面数
    pub adaptive_max_pages: usize,

    /// 自适应爬取的置信度阈值
    pub adaptive_confidence_threshold: f64,

    /// 自适应爬取每个页面跟进的链接数
    pub adaptive_top_k_links: usize,

    /// 自适应爬取使用的检索意图
    pub adaptive_query: String,

    /// 单次请求超时（秒）
    pub timeout_seconds: u64,
}

/// 搜索配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    /// Firecrawl API KEY，为空时web_search工具不可用
    pub api_key: String,

    pub base_url: String,

    /// 单次搜索返回的最大条数
    pub max_results: usize,
}

/// 长期记忆配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct MemoryConfig {
    /// Pinecone API KEY，为空时使用进程内记忆
    pub pinecone_api_key: String,

    /// Pinecone 索引的数据面地址（需开启集成embedding）
    pub pinecone_index_host: String,

    pub pinecone_namespace: String,

    /// 召回时的相关度阈值
    pub relevance_threshold: f64,

    /// 每次召回的最大条数
    pub recall_limit: usize,
}

/// 会话存储配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    /// 会话存储地址：sqlite://<path> 或 memory
    pub database_url: String,
}

/// 会话存储后端
#[derive(Debug, Clone, PartialEq)]
pub enum SessionBackend {
    Sqlite(PathBuf),
    InMemory,
}

/// 缓存配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    /// 是否启用缓存
    pub enabled: bool,

    /// 缓存目录
    pub cache_dir: PathBuf,

    /// 缓存过期时间（小时）
    pub expire_hours: u64,
}

/// 求解流程配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ResolverConfig {
    /// 修复循环的最大轮数
    pub max_fix_iterations: usize,

    /// 每个Search Agent最多采纳的URL数量
    pub max_urls_per_search: usize,
}

/// Web服务配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Config {
    /// 从文件加载配置
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let mut file =
            File::open(path).context(format!("Failed to open config file: {:?}", path))?;
        let mut content = String::new();
        file.read_to_string(&mut content)
            .context("Failed to read config file")?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// 是否配置了Pinecone长期记忆
    pub fn pinecone_enabled(&self) -> bool {
        !self.memory.pinecone_api_key.is_empty() && !self.memory.pinecone_index_host.is_empty()
    }
}

impl SessionConfig {
    /// 解析会话存储地址
    pub fn backend(&self) -> Result<SessionBackend, ResolverError> {
        let url = self.database_url.trim();
        if url.is_empty() || url == "memory" || url == ":memory:" {
            return Ok(SessionBackend::InMemory);
        }

        for prefix in ["sqlite+aiosqlite:///", "sqlite:///", "sqlite://"] {
            if let Some(path) = url.strip_prefix(prefix) {
                if path.is_empty() {
                    break;
                }
                if path == ":memory:" {
                    return Ok(SessionBackend::InMemory);
                }
                return Ok(SessionBackend::Sqlite(Path::new(path).to_path_buf()));
            }
        }

        Err(ResolverError::UnsupportedSessionBackend(
            redact_url(url).to_string(),
        ))
    }
}

/// 只保留协议部分，避免在日志和错误中泄露连接串里的密码
pub fn redact_url(url: &str) -> &str {
    url.split("://").next().unwrap_or(url)
}

fn env_or(keys: &[&str], fallback: &str) -> String {
    keys.iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| fallback.to_string())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: String::from("package_conflict_resolver"),
            user_id: String::from("default_user"),
            llm: LLMConfig::default(),
            crawl: CrawlConfig::default(),
            search: SearchConfig::default(),
            memory: MemoryConfig::default(),
            session: SessionConfig::default(),
            cache: CacheConfig::default(),
            resolver: ResolverConfig::default(),
            server: ServerConfig::default(),
            output_path: None,
            verbose: false,
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            research: ModelEndpoint {
                provider: LLMProvider::Gemini,
                api_key: env_or(&["GEMINI_API_KEY", "GOOGLE_API_KEY"], ""),
                api_base_url: String::from("https://generativelanguage.googleapis.com"),
                model: String::from("gemini-2.5-flash"),
            },
            reasoning: ModelEndpoint {
                provider: LLMProvider::OpenRouter,
                api_key: env_or(&["OPENROUTER_API_KEY"], ""),
                api_base_url: String::from("https://openrouter.ai/api/v1"),
                model: String::from("z-ai/glm-4.5-air:free"),
            },
            max_tokens: 8192,
            temperature: 0.1,
            retry_attempts: 3,
            retry_delay_ms: 2000,
            timeout_seconds: 300,
            max_tool_turns: 8,
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            backend: CrawlBackend::default(),
            crawl4ai_base_url: env_or(&["CRAWL4AI_BASE_URL"], "http://localhost:11235"),
            crawl4ai_api_token: std::env::var("CRAWL4AI_API_TOKEN")
                .ok()
                .filter(|v| !v.is_empty()),
            firecrawl_api_key: env_or(&["FIRECRAWL_API_KEY"], ""),
            firecrawl_base_url: String::from("https://api.firecrawl.dev"),
            min_total_chars: 500,
            allow_failed_pages: false,
            require_version_keywords: false,
            adaptive_max_pages: 3,
            adaptive_confidence_threshold: 0.7,
            adaptive_top_k_links: 2,
            adaptive_query: String::from("dependency conflicts version requirements"),
            timeout_seconds: 120,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: env_or(&["FIRECRAWL_API_KEY"], ""),
            base_url: String::from("https://api.firecrawl.dev"),
            max_results: 5,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            pinecone_api_key: env_or(&["PINECONE_API_KEY"], ""),
            pinecone_index_host: env_or(&["PINECONE_INDEX_HOST"], ""),
            pinecone_namespace: String::from("adk-memory"),
            relevance_threshold: 0.5,
            recall_limit: 3,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            database_url: env_or(&["DATABASE_URL"], "sqlite://package_doctor.db"),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cache_dir: PathBuf::from(".package-doctor/cache"),
            expire_hours: 24,
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_fix_iterations: 3,
            max_urls_per_search: 4,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: String::from("0.0.0.0:7860"),
        }
    }
}
