//! 会话存储
//!
//! 每次对话对应一条会话记录：事件历史 + 共享状态。

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::config::{SessionBackend, SessionConfig};

mod in_memory;
mod lazy;
mod sqlite;

pub use in_memory::InMemorySessionStore;
pub use lazy::LazySessionStore;
pub use sqlite::SqliteSessionStore;

/// 会话中的一条事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub id: String,
    /// 事件作者：`user` 或 Agent 名称
    pub author: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// 是否请求终止所在的循环
    #[serde(default)]
    pub escalate: bool,
}

impl SessionEvent {
    pub fn new(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            author: author.into(),
            content: content.into(),
            timestamp: Utc::now(),
            escalate: false,
        }
    }

    pub fn with_escalate(mut self, escalate: bool) -> Self {
        self.escalate = escalate;
        self
    }
}

/// 会话记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub app_name: String,
    pub user_id: String,
    #[serde(default)]
    pub state: Map<String, Value>,
    #[serde(default)]
    pub events: Vec<SessionEvent>,
    pub created_at: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, app_name: &str, user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            state: Map::new(),
            events: Vec::new(),
            created_at: now,
            last_update_time: now,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            app_name: self.app_name.clone(),
            user_id: self.user_id.clone(),
            event_count: self.events.len(),
            created_at: self.created_at,
            last_update_time: self.last_update_time,
        }
    }
}

/// 会话列表中的摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub app_name: String,
    pub user_id: String,
    pub event_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
}

/// 会话存储接口
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 创建会话，未指定id时生成UUID
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<&str>,
    ) -> Result<Session>;

    async fn get_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Session>>;

    async fn list_sessions(&self, app_name: &str, user_id: &str) -> Result<Vec<SessionSummary>>;

    async fn append_event(&self, session: &Session, event: SessionEvent) -> Result<()>;

    /// 覆盖写入会话状态
    async fn update_state(&self, session: &Session, state: Map<String, Value>) -> Result<()>;

    async fn delete_session(&self, app_name: &str, user_id: &str, session_id: &str)
    -> Result<()>;
}

pub(crate) fn resolve_session_id(session_id: Option<&str>) -> String {
    match session_id {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => uuid::Uuid::new_v4().to_string(),
    }
}

/// 根据配置创建会话存储，外层包裹延迟持久化
pub fn open_session_store(config: &SessionConfig) -> Result<Arc<dyn SessionStore>> {
    let store: Arc<dyn SessionStore> = match config.backend()? {
        SessionBackend::Sqlite(path) => {
            let store = SqliteSessionStore::open(&path)?;
            tracing::info!("✅ 会话存储已初始化 (Lazy): sqlite://...");
            Arc::new(LazySessionStore::new(store))
        }
        SessionBackend::InMemory => {
            tracing::info!("✅ 会话存储已初始化: memory");
            Arc::new(LazySessionStore::new(InMemorySessionStore::new()))
        }
    };
    Ok(store)
}
