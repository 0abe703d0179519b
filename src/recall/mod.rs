//! 长期记忆：跨会话召回历史诊断结论
//!
//! 每次求解结束后会话被整理成一段文本写入记忆服务，
//! Query Creator 在新会话开始时按错误描述召回相似的历史记录。

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::MemoryConfig;
use crate::memory::StateKeys;
use crate::session::Session;

mod in_memory;
mod pinecone;

pub use in_memory::InMemoryMemoryService;
pub use pinecone::PineconeMemoryService;

/// 写入向量库时保留的文本长度
pub const SNIPPET_LIMIT: usize = 1000;

/// 一条召回结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub session_id: String,
    pub text: String,
    pub timestamp: String,
    pub score: f64,
}

#[async_trait]
pub trait MemoryService: Send + Sync {
    /// 将会话写入长期记忆
    async fn add_session_to_memory(&self, session: &Session) -> Result<()>;

    /// 按查询召回相关记忆，按相关度降序
    async fn search_memory(&self, query: &str, limit: usize) -> Result<Vec<MemoryEntry>>;
}

/// 将会话整理为可检索的文本：事件历史 + 最终方案 + 时间戳
pub fn session_to_text(session: &Session) -> String {
    let mut text = String::new();
    for event in &session.events {
        text.push_str(&format!("{}: {}\n", event.author, event.content));
    }

    if text.trim().is_empty() {
        return String::new();
    }

    let state_text = |key: &str| {
        session.state.get(key).map(|value| match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    };
    if let Some(solution) = state_text(StateKeys::SOLUTION) {
        text.push_str(&format!("\n\n--- FINAL SOLUTION ---\n{}\n", solution));
    }
    if let Some(requirements) = state_text(StateKeys::REQUIREMENTS) {
        text.push_str(&format!("\n\n--- REQUIREMENTS ---\n{}\n", requirements));
    }

    text.push_str(&format!(
        "\n\n--- TIMESTAMP ---\n{}\n",
        session.created_at.to_rfc3339()
    ));
    text
}

/// 截取前 `SNIPPET_LIMIT` 个字符
pub fn snippet(text: &str) -> String {
    text.chars().take(SNIPPET_LIMIT).collect()
}

pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// 根据配置选择记忆服务，Pinecone 初始化失败时退回进程内实现
pub fn open_memory_service(config: &MemoryConfig) -> Arc<dyn MemoryService> {
    let pinecone_ready =
        !config.pinecone_api_key.is_empty() && !config.pinecone_index_host.is_empty();
    tracing::info!(
        "🔍 检查 PINECONE_API_KEY: {}",
        if config.pinecone_api_key.is_empty() {
            "Missing"
        } else {
            "Found"
        }
    );

    if pinecone_ready {
        match PineconeMemoryService::new(config) {
            Ok(service) => {
                tracing::info!("✅ 记忆服务已初始化: Pinecone (长期向量存储)");
                return Arc::new(service);
            }
            Err(e) => {
                tracing::error!("❌ Pinecone 初始化失败，退回进程内记忆: {}", e);
            }
        }
    }

    tracing::info!("✅ 记忆服务已初始化: InMemory (临时)");
    Arc::new(InMemoryMemoryService::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionEvent;
    use serde_json::json;

    #[test]
    fn test_session_to_text() {
        let mut session = Session::new("s1", "app", "user");
        session
            .events
            .push(SessionEvent::new("user", "numpy.float AttributeError"));
        session
            .events
            .push(SessionEvent::new("Code_Surgeon_Agent", "pin numpy<1.24"));
        session
            .state
            .insert(StateKeys::REQUIREMENTS.to_string(), json!("numpy==1.23.5"));

        let text = session_to_text(&session);
        assert!(text.starts_with("user: numpy.float AttributeError\nCode_Surgeon_Agent: pin numpy<1.24\n"));
        assert!(text.contains("--- REQUIREMENTS ---\nnumpy==1.23.5"));
        assert!(!text.contains("--- FINAL SOLUTION ---"));
        assert!(text.contains("--- TIMESTAMP ---"));
    }

    #[test]
    fn test_empty_session_yields_empty_text() {
        let session = Session::new("s1", "app", "user");
        assert!(session_to_text(&session).is_empty());
    }

    #[test]
    fn test_snippet_limit() {
        let text = "é".repeat(SNIPPET_LIMIT + 5);
        assert_eq!(snippet(&text).chars().count(), SNIPPET_LIMIT);
    }

    #[test]
    fn test_open_memory_service_without_pinecone() {
        let config = MemoryConfig {
            pinecone_api_key: String::new(),
            ..MemoryConfig::default()
        };
        // 只要能构造出来即可
        let _service = open_memory_service(&config);
    }
}
