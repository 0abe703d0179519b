//! 单次会话内的工作状态
//!
//! Agent 之间通过作用域键值共享中间结果（包列表、检索语句、验证状态等），
//! 对应会话存储里的 `state` 字段。

use anyhow::Result;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// 常用作用域
pub struct MemoryScope;

impl MemoryScope {
    /// Agent通过 save_context / retrieve_context 读写的共享状态
    pub const STATE: &'static str = "state";
}

/// 常用的状态键
pub struct StateKeys;

impl StateKeys {
    pub const PACKAGES: &'static str = "packages";
    pub const SEARCH_QUERIES: &'static str = "search_queries";
    pub const CANDIDATE_URLS: &'static str = "candidate_urls";
    pub const FINDINGS: &'static str = "findings";
    pub const REQUIREMENTS: &'static str = "requirements";
    pub const SOLUTION: &'static str = "solution";
    pub const VERIFICATION_STATUS: &'static str = "verification_status";
}

/// 在并发的Agent之间共享的工作状态
pub type SharedState = Arc<Mutex<Memory>>;

/// 作用域键值存储，键形如 `scope:key`
#[derive(Debug, Default)]
pub struct Memory {
    data: HashMap<String, Value>,
}

fn scoped(scope: &str, key: &str) -> String {
    format!("{}:{}", scope, key)
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    /// 从会话中持久化的状态恢复，所有键都归入 `state` 作用域
    pub fn from_state(state: &Map<String, Value>) -> Self {
        let mut memory = Self::new();
        for (key, value) in state {
            // Value 序列化不会失败
            let _ = memory.store(MemoryScope::STATE, key, value.clone());
        }
        memory
    }

    /// 导出 `state` 作用域，用于写回会话存储
    pub fn state_snapshot(&self) -> Map<String, Value> {
        let prefix = format!("{}:", MemoryScope::STATE);
        self.data
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(&prefix)
                    .map(|short| (short.to_string(), value.clone()))
            })
            .collect()
    }

    /// 覆盖写入，值先转换为JSON
    pub fn store<T: Serialize>(&mut self, scope: &str, key: &str, data: T) -> Result<()> {
        self.data
            .insert(scoped(scope, key), serde_json::to_value(data)?);
        Ok(())
    }

    /// 类型不匹配时返回 None
    pub fn get<T: DeserializeOwned>(&self, scope: &str, key: &str) -> Option<T> {
        self.data
            .get(&scoped(scope, key))
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// 以文本形式读取，非字符串的值按JSON输出
    pub fn get_text(&self, scope: &str, key: &str) -> Option<String> {
        self.get::<Value>(scope, key).map(|value| match value {
            Value::String(text) => text,
            other => other.to_string(),
        })
    }

    pub fn contains(&self, scope: &str, key: &str) -> bool {
        self.data.contains_key(&scoped(scope, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_store_and_get() {
        let mut memory = Memory::new();
        memory
            .store(MemoryScope::STATE, StateKeys::PACKAGES, "pydantic, fastapi")
            .unwrap();

        let packages: Option<String> = memory.get(MemoryScope::STATE, StateKeys::PACKAGES);
        assert_eq!(packages.as_deref(), Some("pydantic, fastapi"));
        assert!(memory.contains(MemoryScope::STATE, StateKeys::PACKAGES));
        assert!(!memory.contains(MemoryScope::STATE, StateKeys::SOLUTION));
    }

    #[test]
    fn test_get_text_renders_json() {
        let mut memory = Memory::new();
        memory
            .store(MemoryScope::STATE, StateKeys::SEARCH_QUERIES, vec!["a", "b"])
            .unwrap();
        assert_eq!(
            memory.get_text(MemoryScope::STATE, StateKeys::SEARCH_QUERIES).as_deref(),
            Some(r#"["a","b"]"#)
        );
    }

    #[test]
    fn test_state_snapshot_roundtrip_only_state_scope() {
        let mut memory = Memory::new();
        memory.store(MemoryScope::STATE, "verification_status", "SUCCESS").unwrap();
        memory.store("scratch", "ignored", 1).unwrap();

        let snapshot = memory.state_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["verification_status"], json!("SUCCESS"));

        let restored = Memory::from_state(&snapshot);
        assert_eq!(
            restored.get_text(MemoryScope::STATE, "verification_status").as_deref(),
            Some("SUCCESS")
        );
    }

    #[test]
    fn test_store_overwrites_and_type_mismatch() {
        let mut memory = Memory::new();
        memory.store(MemoryScope::STATE, "k", "12345").unwrap();
        memory.store(MemoryScope::STATE, "k", 7).unwrap();
        assert_eq!(memory.get::<u32>(MemoryScope::STATE, "k"), Some(7));
        assert_eq!(memory.get::<String>(MemoryScope::STATE, "k"), None);
    }
}
