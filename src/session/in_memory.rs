use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{Session, SessionEvent, SessionStore, SessionSummary, resolve_session_id};
use crate::error::ResolverError;

type SessionKey = (String, String, String);

/// 进程内会话存储，重启后丢失
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionKey, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(app_name: &str, user_id: &str, session_id: &str) -> SessionKey {
        (
            app_name.to_string(),
            user_id.to_string(),
            session_id.to_string(),
        )
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<&str>,
    ) -> Result<Session> {
        let id = resolve_session_id(session_id);
        let session = Session::new(id.clone(), app_name, user_id);
        self.sessions
            .write()
            .await
            .insert(Self::key(app_name, user_id, &id), session.clone());
        Ok(session)
    }

    async fn get_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Session>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(&Self::key(app_name, user_id, session_id))
            .cloned())
    }

    async fn list_sessions(&self, app_name: &str, user_id: &str) -> Result<Vec<SessionSummary>> {
        let sessions = self.sessions.read().await;
        let mut summaries: Vec<SessionSummary> = sessions
            .values()
            .filter(|s| s.app_name == app_name && s.user_id == user_id)
            .map(Session::summary)
            .collect();
        summaries.sort_by(|a, b| b.last_update_time.cmp(&a.last_update_time));
        Ok(summaries)
    }

    async fn append_event(&self, session: &Session, event: SessionEvent) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let stored = sessions
            .get_mut(&Self::key(&session.app_name, &session.user_id, &session.id))
            .ok_or_else(|| ResolverError::SessionNotFound(session.id.clone()))?;
        stored.last_update_time = event.timestamp;
        stored.events.push(event);
        Ok(())
    }

    async fn update_state(&self, session: &Session, state: Map<String, Value>) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let stored = sessions
            .get_mut(&Self::key(&session.app_name, &session.user_id, &session.id))
            .ok_or_else(|| ResolverError::SessionNotFound(session.id.clone()))?;
        stored.state = state;
        stored.last_update_time = Utc::now();
        Ok(())
    }

    async fn delete_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<()> {
        self.sessions
            .write()
            .await
            .remove(&Self::key(app_name, user_id, session_id));
        Ok(())
    }
}
