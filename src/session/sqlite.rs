use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{Session, SessionEvent, SessionStore, SessionSummary, resolve_session_id};
use crate::error::ResolverError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    app_name    TEXT NOT NULL,
    user_id     TEXT NOT NULL,
    id          TEXT NOT NULL,
    state       TEXT NOT NULL DEFAULT '{}',
    create_time TEXT NOT NULL,
    update_time TEXT NOT NULL,
    PRIMARY KEY (app_name, user_id, id)
);
CREATE TABLE IF NOT EXISTS events (
    id          TEXT PRIMARY KEY,
    app_name    TEXT NOT NULL,
    user_id     TEXT NOT NULL,
    session_id  TEXT NOT NULL,
    author      TEXT NOT NULL,
    content     TEXT NOT NULL,
    escalate    INTEGER NOT NULL DEFAULT 0,
    timestamp   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_session ON events (app_name, user_id, session_id);
"#;

/// SQLite 会话存储，阻塞调用放在 spawn_blocking 中执行
#[derive(Clone)]
pub struct SqliteSessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSessionStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open session database: {}", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize session schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| anyhow!("session database lock poisoned"))?;
            f(&guard)
        })
        .await?
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("invalid timestamp in session database: {}", value))?
        .with_timezone(&Utc))
}

fn load_session(
    conn: &Connection,
    app_name: &str,
    user_id: &str,
    session_id: &str,
) -> Result<Option<Session>> {
    let row = conn
        .query_row(
            "SELECT state, create_time, update_time FROM sessions
             WHERE app_name = ?1 AND user_id = ?2 AND id = ?3",
            params![app_name, user_id, session_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    let Some((state, create_time, update_time)) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT id, author, content, escalate, timestamp FROM events
         WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3
         ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![app_name, user_id, session_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;

    let mut events = Vec::new();
    for row in rows {
        let (id, author, content, escalate, timestamp) = row?;
        events.push(SessionEvent {
            id,
            author,
            content,
            timestamp: parse_time(&timestamp)?,
            escalate: escalate != 0,
        });
    }

    let state: Map<String, Value> =
        serde_json::from_str(&state).context("invalid session state JSON")?;

    Ok(Some(Session {
        id: session_id.to_string(),
        app_name: app_name.to_string(),
        user_id: user_id.to_string(),
        state,
        events,
        created_at: parse_time(&create_time)?,
        last_update_time: parse_time(&update_time)?,
    }))
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<&str>,
    ) -> Result<Session> {
        let session = Session::new(resolve_session_id(session_id), app_name, user_id);
        let record = session.clone();
        self.run(move |conn| {
            let now = record.created_at.to_rfc3339();
            conn.execute(
                "INSERT OR IGNORE INTO sessions (app_name, user_id, id, state, create_time, update_time)
                 VALUES (?1, ?2, ?3, '{}', ?4, ?4)",
                params![record.app_name, record.user_id, record.id, now],
            )?;
            Ok(())
        })
        .await?;
        Ok(session)
    }

    async fn get_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Session>> {
        let (app_name, user_id, session_id) = (
            app_name.to_string(),
            user_id.to_string(),
            session_id.to_string(),
        );
        self.run(move |conn| load_session(conn, &app_name, &user_id, &session_id))
            .await
    }

    async fn list_sessions(&self, app_name: &str, user_id: &str) -> Result<Vec<SessionSummary>> {
        let (app_name, user_id) = (app_name.to_string(), user_id.to_string());
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT s.id, s.create_time, s.update_time,
                        (SELECT COUNT(*) FROM events e
                          WHERE e.app_name = s.app_name AND e.user_id = s.user_id AND e.session_id = s.id)
                 FROM sessions s
                 WHERE s.app_name = ?1 AND s.user_id = ?2
                 ORDER BY s.update_time DESC",
            )?;
            let rows = stmt.query_map(params![app_name, user_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?;

            let mut summaries = Vec::new();
            for row in rows {
                let (id, create_time, update_time, event_count) = row?;
                summaries.push(SessionSummary {
                    id,
                    app_name: app_name.clone(),
                    user_id: user_id.clone(),
                    event_count: event_count as usize,
                    created_at: parse_time(&create_time)?,
                    last_update_time: parse_time(&update_time)?,
                });
            }
            Ok(summaries)
        })
        .await
    }

    async fn append_event(&self, session: &Session, event: SessionEvent) -> Result<()> {
        let session = session.clone();
        self.run(move |conn| {
            let updated = conn.execute(
                "UPDATE sessions SET update_time = ?4 WHERE app_name = ?1 AND user_id = ?2 AND id = ?3",
                params![
                    session.app_name,
                    session.user_id,
                    session.id,
                    event.timestamp.to_rfc3339()
                ],
            )?;
            if updated == 0 {
                return Err(ResolverError::SessionNotFound(session.id).into());
            }
            conn.execute(
                "INSERT INTO events (id, app_name, user_id, session_id, author, content, escalate, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    event.id,
                    session.app_name,
                    session.user_id,
                    session.id,
                    event.author,
                    event.content,
                    event.escalate as i64,
                    event.timestamp.to_rfc3339()
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_state(&self, session: &Session, state: Map<String, Value>) -> Result<()> {
        let session = session.clone();
        let state = serde_json::to_string(&state)?;
        self.run(move |conn| {
            let updated = conn.execute(
                "UPDATE sessions SET state = ?4, update_time = ?5
                 WHERE app_name = ?1 AND user_id = ?2 AND id = ?3",
                params![
                    session.app_name,
                    session.user_id,
                    session.id,
                    state,
                    Utc::now().to_rfc3339()
                ],
            )?;
            if updated == 0 {
                return Err(ResolverError::SessionNotFound(session.id).into());
            }
            Ok(())
        })
        .await
    }

    async fn delete_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<()> {
        let (app_name, user_id, session_id) = (
            app_name.to_string(),
            user_id.to_string(),
            session_id.to_string(),
        );
        self.run(move |conn| {
            conn.execute(
                "DELETE FROM events WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3",
                params![app_name, user_id, session_id],
            )?;
            conn.execute(
                "DELETE FROM sessions WHERE app_name = ?1 AND user_id = ?2 AND id = ?3",
                params![app_name, user_id, session_id],
            )?;
            Ok(())
        })
        .await
    }
}
