//! 网页搜索（Firecrawl search API）

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SearchConfig;
use crate::error::ResolverError;

/// 一条搜索结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[async_trait]
pub trait SearchEngine: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;
}

pub struct FirecrawlSearch {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Vec<SearchHit>,
    #[serde(default)]
    error: Option<String>,
}

impl FirecrawlSearch {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(ResolverError::SearchService("FIRECRAWL_API_KEY is not set".into()).into());
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl SearchEngine for FirecrawlSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        tracing::debug!("🔎 搜索: {}", query);
        let response = self
            .client
            .post(format!("{}/v1/search", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({"query": query, "limit": limit}))
            .send()
            .await
            .map_err(|e| ResolverError::SearchService(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ResolverError::SearchService(format!("HTTP {}: {}", status, text)).into());
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| ResolverError::SearchService(format!("invalid response: {}", e)))?;
        if !parsed.success {
            return Err(ResolverError::SearchService(
                parsed
                    .error
                    .unwrap_or_else(|| "search reported failure".to_string()),
            )
            .into());
        }

        let mut hits = parsed.data;
        hits.truncate(limit);
        Ok(hits)
    }
}

/// 配置了 API KEY 时创建搜索服务，否则返回 None
pub fn create_search_engine(config: &SearchConfig) -> Option<Arc<dyn SearchEngine>> {
    match FirecrawlSearch::new(config) {
        Ok(engine) => Some(Arc::new(engine)),
        Err(e) => {
            tracing::warn!("⚠️ 搜索服务不可用，web_search 工具将返回错误: {}", e);
            None
        }
    }
}
