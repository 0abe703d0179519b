use anyhow::Result;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;

use crate::config::CacheConfig;

/// 模型响应缓存，按 prompt 的 MD5 落盘为 JSON 文件
pub struct CacheManager {
    config: CacheConfig,
    stats: CacheStats,
}

/// 缓存条目
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: u64,
    /// prompt的MD5哈希值，用于缓存键的生成和验证
    pub prompt_hash: String,
    /// 使用的模型名称（可选）
    pub model_name: Option<String>,
}

#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    errors: AtomicU64,
}

/// 缓存命中情况
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheReport {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub errors: u64,
}

impl CacheReport {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            stats: CacheStats::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// 生成prompt的MD5哈希
    pub fn hash_prompt(&self, prompt: &str) -> String {
        let mut hasher = Md5::new();
        hasher.update(prompt.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// 获取缓存文件路径
    fn get_cache_path(&self, category: &str, hash: &str) -> PathBuf {
        self.config
            .cache_dir
            .join(category)
            .join(format!("{}.json", hash))
    }

    /// 检查缓存是否过期
    fn is_expired(&self, timestamp: u64) -> bool {
        let expire_seconds = self.config.expire_hours * 3600;
        now_secs().saturating_sub(timestamp) > expire_seconds
    }

    /// 获取缓存
    pub async fn get<T>(&self, category: &str, prompt: &str) -> Result<Option<T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        if !self.config.enabled {
            return Ok(None);
        }

        let hash = self.hash_prompt(prompt);
        let cache_path = self.get_cache_path(category, &hash);

        if !cache_path.exists() {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        let content = match fs::read_to_string(&cache_path).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("⚠️ 读取缓存文件失败: {}", e);
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };

        match serde_json::from_str::<CacheEntry<T>>(&content) {
            Ok(entry) if self.is_expired(entry.timestamp) => {
                // 删除过期缓存
                let _ = fs::remove_file(&cache_path).await;
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Ok(entry) => {
                tracing::debug!("💾 缓存命中: {}/{}", category, hash);
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry.data))
            }
            Err(e) => {
                tracing::warn!("⚠️ 缓存反序列化失败: {}", e);
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// 写入缓存
    pub async fn set<T>(
        &self,
        category: &str,
        prompt: &str,
        data: T,
        model_name: Option<&str>,
    ) -> Result<()>
    where
        T: Serialize,
    {
        if !self.config.enabled {
            return Ok(());
        }

        let hash = self.hash_prompt(prompt);
        let cache_path = self.get_cache_path(category, &hash);

        // 确保目录存在
        if let Some(parent) = cache_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let entry = CacheEntry {
            data,
            timestamp: now_secs(),
            prompt_hash: hash,
            model_name: model_name.map(str::to_string),
        };

        let content = serde_json::to_string_pretty(&entry)?;
        match fs::write(&cache_path, content).await {
            Ok(_) => {
                self.stats.writes.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                Err(e.into())
            }
        }
    }

    pub fn report(&self) -> CacheReport {
        CacheReport {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir, enabled: bool) -> CacheManager {
        CacheManager::new(CacheConfig {
            enabled,
            cache_dir: dir.path().to_path_buf(),
            expire_hours: 24,
        })
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let dir = TempDir::new().unwrap();
        let cache = manager(&dir, true);

        assert!(cache.get::<String>("prompt", "hello").await.unwrap().is_none());
        cache
            .set("prompt", "hello", "world".to_string(), Some("gemini-2.5-flash"))
            .await
            .unwrap();
        assert_eq!(
            cache.get::<String>("prompt", "hello").await.unwrap(),
            Some("world".to_string())
        );

        let report = cache.report();
        assert_eq!(report.hits, 1);
        assert_eq!(report.misses, 1);
        assert_eq!(report.writes, 1);
        assert!((report.hit_rate() - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_disabled_cache_never_stores() {
        let dir = TempDir::new().unwrap();
        let cache = manager(&dir, false);
        cache.set("prompt", "k", 1u32, None).await.unwrap();
        assert!(cache.get::<u32>("prompt", "k").await.unwrap().is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_expired_entry_is_removed() {
        let dir = TempDir::new().unwrap();
        let cache = manager(&dir, true);
        let hash = cache.hash_prompt("old");
        let path = dir.path().join("prompt").join(format!("{}.json", hash));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let entry = CacheEntry {
            data: "stale".to_string(),
            timestamp: 0,
            prompt_hash: hash,
            model_name: None,
        };
        std::fs::write(&path, serde_json::to_string(&entry).unwrap()).unwrap();

        assert!(cache.get::<String>("prompt", "old").await.unwrap().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_hash_is_stable() {
        let dir = TempDir::new().unwrap();
        let cache = manager(&dir, true);
        assert_eq!(cache.hash_prompt("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }
}
