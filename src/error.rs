//! 可识别的错误类型，其余错误统一以 anyhow::Error 传递

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolverError {
    /// 会话存储地址无法识别
    #[error("unsupported session backend: {0} (expected sqlite://<path> or memory)")]
    UnsupportedSessionBackend(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// 爬取服务返回失败
    #[error("{service} request failed: {message}")]
    CrawlService {
        service: &'static str,
        message: String,
    },

    #[error("search service request failed: {0}")]
    SearchService(String),

    #[error("memory service request failed: {0}")]
    MemoryService(String),

    /// 模型输出无法解析为预期结构
    #[error("model output could not be parsed as {expected}: {reason}")]
    InvalidModelOutput {
        expected: &'static str,
        reason: String,
    },
}
