use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

use super::{MemoryEntry, MemoryService, now_timestamp, session_to_text, snippet};
use crate::config::MemoryConfig;
use crate::error::ResolverError;
use crate::session::Session;

const API_VERSION: &str = "2025-04";

/// 基于 Pinecone 集成 embedding 索引的长期记忆
///
/// 写入与检索都走 records API，向量化由索引自身完成。
pub struct PineconeMemoryService {
    client: reqwest::Client,
    host: String,
    api_key: String,
    namespace: String,
    relevance_threshold: f64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: SearchResult,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score")]
    score: f64,
    #[serde(default)]
    fields: Value,
}

impl PineconeMemoryService {
    pub fn new(config: &MemoryConfig) -> Result<Self> {
        if config.pinecone_api_key.is_empty() {
            return Err(ResolverError::MemoryService("PINECONE_API_KEY is not set".into()).into());
        }
        let host = normalize_host(&config.pinecone_index_host);
        if host.is_empty() {
            return Err(
                ResolverError::MemoryService("PINECONE_INDEX_HOST is not set".into()).into(),
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            host,
            api_key: config.pinecone_api_key.clone(),
            namespace: config.pinecone_namespace.clone(),
            relevance_threshold: config.relevance_threshold,
        })
    }

    fn endpoint(&self, action: &str) -> String {
        format!(
            "{}/records/namespaces/{}/{}",
            self.host, self.namespace, action
        )
    }

    async fn post(&self, action: &str, content_type: &str, body: String) -> Result<String> {
        let response = self
            .client
            .post(self.endpoint(action))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| ResolverError::MemoryService(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ResolverError::MemoryService(format!(
                "{} failed with HTTP {}: {}",
                action, status, text
            ))
            .into());
        }
        Ok(text)
    }
}

/// 补全协议前缀并去掉末尾斜杠
fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.is_empty() || host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

#[async_trait]
impl MemoryService for PineconeMemoryService {
    async fn add_session_to_memory(&self, session: &Session) -> Result<()> {
        let text = session_to_text(session);
        if text.trim().is_empty() {
            tracing::warn!("⚠️ 会话内容为空，跳过写入 Pinecone");
            return Ok(());
        }

        let record = json!({
            "_id": session.id,
            "text": snippet(&text),
            "session_id": session.id,
            "timestamp": now_timestamp(),
        });
        // upsert 接口要求 NDJSON，每行一条记录
        let body = format!("{}\n", record);
        self.post("upsert", "application/x-ndjson", body).await?;

        tracing::info!("✅ 会话 {} 已写入 Pinecone", session.id);
        Ok(())
    }

    async fn search_memory(&self, query: &str, limit: usize) -> Result<Vec<MemoryEntry>> {
        let body = json!({
            "query": {
                "inputs": { "text": query },
                "top_k": limit,
            },
            "fields": ["text", "session_id", "timestamp"],
        });
        let raw = self
            .post("search", "application/json", body.to_string())
            .await?;
        let response: SearchResponse = serde_json::from_str(&raw)
            .map_err(|e| ResolverError::MemoryService(format!("invalid search response: {}", e)))?;

        let field = |hit: &SearchHit, name: &str| {
            hit.fields
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let entries: Vec<MemoryEntry> = response
            .result
            .hits
            .iter()
            .filter(|hit| hit.score > self.relevance_threshold)
            .map(|hit| {
                let session_id = field(hit, "session_id");
                MemoryEntry {
                    session_id: if session_id.is_empty() {
                        hit.id.clone()
                    } else {
                        session_id
                    },
                    text: field(hit, "text"),
                    timestamp: field(hit, "timestamp"),
                    score: hit.score,
                }
            })
            .collect();

        tracing::debug!(
            "🔍 Pinecone 召回 {} 条（共 {} 条候选）",
            entries.len(),
            response.result.hits.len()
        );
        Ok(entries)
    }
}
