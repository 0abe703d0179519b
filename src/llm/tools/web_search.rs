//! 网页搜索工具

use rig::tool::Tool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::search::{SearchEngine, SearchHit};

#[derive(Clone)]
pub struct AgentToolWebSearch {
    engine: Option<Arc<dyn SearchEngine>>,
    default_limit: usize,
}

#[derive(Debug, Deserialize)]
pub struct WebSearchArgs {
    pub query: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct WebSearchResult {
    pub query: String,
    pub results: Vec<SearchHit>,
}

#[derive(Debug, thiserror::Error)]
pub enum WebSearchError {
    #[error("web search is not configured (set FIRECRAWL_API_KEY)")]
    NotConfigured,
    #[error("web search failed: {0}")]
    Failed(String),
}

impl AgentToolWebSearch {
    pub fn new(engine: Option<Arc<dyn SearchEngine>>, default_limit: usize) -> Self {
        Self {
            engine,
            default_limit,
        }
    }
}

impl Tool for AgentToolWebSearch {
    const NAME: &'static str = "web_search";

    type Error = WebSearchError;
    type Args = WebSearchArgs;
    type Output = WebSearchResult;

    async fn definition(&self, _prompt: String) -> rig::completion::ToolDefinition {
        rig::completion::ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Searches the web and returns result URLs with titles and short descriptions.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query."
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of results (default 5)."
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        tracing::debug!("   🔧 tool called...web_search@{}", args.query);
        let engine = self.engine.as_ref().ok_or(WebSearchError::NotConfigured)?;
        let limit = args.limit.unwrap_or(self.default_limit).clamp(1, 10);
        let results = engine
            .search(&args.query, limit)
            .await
            .map_err(|e| WebSearchError::Failed(e.to_string()))?;
        Ok(WebSearchResult {
            query: args.query,
            results,
        })
    }
}
