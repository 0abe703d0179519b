//! 长期记忆召回工具：load_memory

use rig::tool::Tool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::recall::MemoryService;

#[derive(Clone)]
pub struct AgentToolLoadMemory {
    service: Arc<dyn MemoryService>,
    limit: usize,
}

#[derive(Debug, Deserialize)]
pub struct LoadMemoryArgs {
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct RecalledMemory {
    pub session_id: String,
    pub timestamp: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct LoadMemoryResult {
    pub memories: Vec<RecalledMemory>,
}

#[derive(Debug, thiserror::Error)]
#[error("memory recall failed: {0}")]
pub struct LoadMemoryError(String);

impl AgentToolLoadMemory {
    pub fn new(service: Arc<dyn MemoryService>, limit: usize) -> Self {
        Self { service, limit }
    }
}

impl Tool for AgentToolLoadMemory {
    const NAME: &'static str = "load_memory";

    type Error = LoadMemoryError;
    type Args = LoadMemoryArgs;
    type Output = LoadMemoryResult;

    async fn definition(&self, _prompt: String) -> rig::completion::ToolDefinition {
        rig::completion::ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Recalls details from previous conversations (earlier errors and the fixes that were proposed). Use it when the user refers to a previous error.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "What to look for in past conversations."
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        tracing::debug!("   🔧 tool called...load_memory@{}", args.query);
        let entries = self
            .service
            .search_memory(&args.query, self.limit)
            .await
            .map_err(|e| LoadMemoryError(e.to_string()))?;

        Ok(LoadMemoryResult {
            memories: entries
                .into_iter()
                .map(|entry| RecalledMemory {
                    session_id: entry.session_id,
                    timestamp: entry.timestamp,
                    text: entry.text,
                })
                .collect(),
        })
    }
}
