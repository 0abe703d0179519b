//! 会话状态读写工具：save_context / retrieve_context

use rig::tool::Tool;
use serde::Deserialize;

use crate::memory::{MemoryScope, SharedState};

/// 写入会话状态
#[derive(Clone)]
pub struct AgentToolSaveContext {
    state: SharedState,
}

/// 读取会话状态
#[derive(Clone)]
pub struct AgentToolRetrieveContext {
    state: SharedState,
}

#[derive(Debug, Deserialize)]
pub struct SaveContextArgs {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct RetrieveContextArgs {
    pub key: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionStateToolError {
    #[error("state key must not be empty")]
    EmptyKey,
    #[error("failed to store state: {0}")]
    Store(String),
}

impl AgentToolSaveContext {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

impl AgentToolRetrieveContext {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

impl Tool for AgentToolSaveContext {
    const NAME: &'static str = "save_context";

    type Error = SessionStateToolError;
    type Args = SaveContextArgs;
    type Output = String;

    async fn definition(&self, _prompt: String) -> rig::completion::ToolDefinition {
        rig::completion::ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Saves a key-value pair to the session state. Useful for remembering packages, versions, or decisions across agents.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "key": {
                        "type": "string",
                        "description": "The key to store (e.g. 'packages', 'versions', 'verification_status')."
                    },
                    "value": {
                        "type": "string",
                        "description": "The value to store."
                    }
                },
                "required": ["key", "value"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let key = args.key.trim();
        if key.is_empty() {
            return Err(SessionStateToolError::EmptyKey);
        }
        self.state
            .lock()
            .await
            .store(MemoryScope::STATE, key, &args.value)
            .map_err(|e| SessionStateToolError::Store(e.to_string()))?;
        tracing::info!("💾 State Saved: {} = {}", key, args.value);
        Ok(format!("Saved {} to state.", key))
    }
}

impl Tool for AgentToolRetrieveContext {
    const NAME: &'static str = "retrieve_context";

    type Error = SessionStateToolError;
    type Args = RetrieveContextArgs;
    type Output = String;

    async fn definition(&self, _prompt: String) -> rig::completion::ToolDefinition {
        rig::completion::ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Retrieves a value from the session state. Returns 'Not found' when the key is missing.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "key": {
                        "type": "string",
                        "description": "The key to retrieve (e.g. 'packages', 'findings')."
                    }
                },
                "required": ["key"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let key = args.key.trim();
        let value = self
            .state
            .lock()
            .await
            .get_text(MemoryScope::STATE, key)
            .unwrap_or_else(|| "Not found".to_string());
        tracing::info!("📂 State Retrieved: {} = {}", key, value);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Memory;

    #[tokio::test]
    async fn test_save_then_retrieve() {
        let state = Memory::new().shared();
        let save = AgentToolSaveContext::new(state.clone());
        let retrieve = AgentToolRetrieveContext::new(state.clone());

        let reply = save
            .call(SaveContextArgs {
                key: "packages".to_string(),
                value: "tensorflow, numpy".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(reply, "Saved packages to state.");

        let value = retrieve
            .call(RetrieveContextArgs {
                key: "packages".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(value, "tensorflow, numpy");
        assert!(state.lock().await.state_snapshot().contains_key("packages"));
    }

    #[tokio::test]
    async fn test_retrieve_missing_key() {
        let retrieve = AgentToolRetrieveContext::new(Memory::new().shared());
        let value = retrieve
            .call(RetrieveContextArgs {
                key: "versions".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(value, "Not found");
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let save = AgentToolSaveContext::new(Memory::new().shared());
        let result = save
            .call(SaveContextArgs {
                key: " ".to_string(),
                value: "x".to_string(),
            })
            .await;
        assert!(matches!(result, Err(SessionStateToolError::EmptyKey)));
    }
}
