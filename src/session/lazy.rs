use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{Session, SessionEvent, SessionStore, SessionSummary, resolve_session_id};

/// 延迟持久化的会话存储
///
/// 新建的会话只登记在内存中，直到第一条事件写入时才真正落库，
/// 这样页面刷新、探活请求之类产生的空会话不会进入数据库。
pub struct LazySessionStore<S> {
    inner: S,
    pending: Mutex<HashMap<String, Session>>,
}

impl<S: SessionStore> LazySessionStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// 如果会话仍处于待定状态，先写入底层存储
    async fn wake(&self, session: &Session) -> Result<()> {
        let pending = self.pending.lock().await.remove(&session.id);
        if let Some(pending) = pending {
            tracing::debug!("⏰ 唤醒延迟会话: {}", pending.id);
            self.inner
                .create_session(&pending.app_name, &pending.user_id, Some(&pending.id))
                .await?;
            if !pending.state.is_empty() {
                self.inner.update_state(&pending, pending.state.clone()).await?;
            }
            tracing::debug!("💾 会话 {} 已持久化", pending.id);
        }
        Ok(())
    }
}

#[async_trait]
impl<S: SessionStore> SessionStore for LazySessionStore<S> {
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<&str>,
    ) -> Result<Session> {
        let id = resolve_session_id(session_id);
        let session = Session::new(id.clone(), app_name, user_id);
        tracing::debug!("💤 延迟会话已创建（待持久化）: {}", id);
        self.pending.lock().await.insert(id, session.clone());
        Ok(session)
    }

    async fn get_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Session>> {
        if let Some(session) = self.pending.lock().await.get(session_id) {
            if session.app_name == app_name && session.user_id == user_id {
                return Ok(Some(session.clone()));
            }
        }
        self.inner.get_session(app_name, user_id, session_id).await
    }

    async fn list_sessions(&self, app_name: &str, user_id: &str) -> Result<Vec<SessionSummary>> {
        self.inner.list_sessions(app_name, user_id).await
    }

    async fn append_event(&self, session: &Session, event: SessionEvent) -> Result<()> {
        self.wake(session).await?;
        self.inner.append_event(session, event).await
    }

    async fn update_state(&self, session: &Session, state: Map<String, Value>) -> Result<()> {
        {
            let mut pending = self.pending.lock().await;
            if let Some(stored) = pending.get_mut(&session.id) {
                stored.state = state;
                return Ok(());
            }
        }
        self.inner.update_state(session, state).await
    }

    async fn delete_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<()> {
        self.pending.lock().await.remove(session_id);
        self.inner
            .delete_session(app_name, user_id, session_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::InMemorySessionStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_pending_session_not_listed_until_first_event() {
        let store = LazySessionStore::new(InMemorySessionStore::new());
        let session = store.create_session("app", "user", Some("s1")).await.unwrap();

        assert_eq!(store.pending_count().await, 1);
        assert!(store.list_sessions("app", "user").await.unwrap().is_empty());
        assert!(store.get_session("app", "user", "s1").await.unwrap().is_some());

        store
            .append_event(&session, SessionEvent::new("user", "hello"))
            .await
            .unwrap();

        assert_eq!(store.pending_count().await, 0);
        let listed = store.list_sessions("app", "user").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].event_count, 1);
    }

    #[tokio::test]
    async fn test_state_written_while_pending_is_persisted_on_wake() {
        let store = LazySessionStore::new(InMemorySessionStore::new());
        let session = store.create_session("app", "user", Some("s2")).await.unwrap();

        let mut state = Map::new();
        state.insert("packages".to_string(), json!("numpy"));
        store.update_state(&session, state).await.unwrap();
        store
            .append_event(&session, SessionEvent::new("user", "hi"))
            .await
            .unwrap();

        let loaded = store.get_session("app", "user", "s2").await.unwrap().unwrap();
        assert_eq!(loaded.state["packages"], json!("numpy"));
        assert_eq!(loaded.events.len(), 1);
    }

    #[tokio::test]
    async fn test_generates_id_when_missing() {
        let store = LazySessionStore::new(InMemorySessionStore::new());
        let session = store.create_session("app", "user", None).await.unwrap();
        assert!(!session.id.is_empty());
    }
}
