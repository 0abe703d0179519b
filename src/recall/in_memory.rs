use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use super::{MemoryEntry, MemoryService, now_timestamp, session_to_text};
use crate::session::Session;

/// 进程内记忆，按关键词重合度召回
#[derive(Default)]
pub struct InMemoryMemoryService {
    entries: RwLock<HashMap<String, (String, String)>>,
}

impl InMemoryMemoryService {
    pub fn new() -> Self {
        Self::default()
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_' && c != '.')
        .map(|w| w.trim_matches('.').to_lowercase())
        .filter(|w| w.len() > 2)
        .collect()
}

/// 查询词在文本中出现的比例
fn overlap_score(query_terms: &HashSet<String>, text: &str) -> f64 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let text_terms = tokenize(text);
    let matched = query_terms.iter().filter(|t| text_terms.contains(*t)).count();
    matched as f64 / query_terms.len() as f64
}

#[async_trait]
impl MemoryService for InMemoryMemoryService {
    async fn add_session_to_memory(&self, session: &Session) -> Result<()> {
        let text = session_to_text(session);
        if text.trim().is_empty() {
            tracing::warn!("⚠️ 会话内容为空，跳过记忆写入");
            return Ok(());
        }
        self.entries
            .write()
            .await
            .insert(session.id.clone(), (text, now_timestamp()));
        tracing::debug!("💾 会话 {} 已写入进程内记忆", session.id);
        Ok(())
    }

    async fn search_memory(&self, query: &str, limit: usize) -> Result<Vec<MemoryEntry>> {
        let query_terms = tokenize(query);
        let entries = self.entries.read().await;

        let mut hits: Vec<MemoryEntry> = entries
            .iter()
            .filter_map(|(session_id, (text, timestamp))| {
                let score = overlap_score(&query_terms, text);
                (score > 0.0).then(|| MemoryEntry {
                    session_id: session_id.clone(),
                    text: text.clone(),
                    timestamp: timestamp.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }
}
