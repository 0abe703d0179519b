//! LLM客户端 - 提供统一的LLM服务接口

use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use crate::cache::CacheManager;
use crate::config::{Config, LLMConfig, ModelEndpoint};
use crate::llm::tools::{AgentTool, Toolbox};

pub mod output;
mod providers;
mod tool_turns;
pub mod types;

pub use output::{parse_json_output, schema_instruction};
pub use types::{AgentProfile, AgentRuntime, ModelRole};

use providers::ProviderClient;
use tool_turns::{ToolRun, run_tool_turns};

const PROMPT_CACHE_CATEGORY: &str = "prompt";
const CHECK_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
const CHECK_USER_PROMPT: &str = "Hello";

/// 第 `retries` 次失败后的等待时长，超大值时饱和而不溢出
fn backoff_delay_ms(base_ms: u64, retries: u32) -> u64 {
    base_ms.saturating_mul(2u64.saturating_pow(retries.saturating_sub(1)))
}

fn prompt_cache_key(endpoint: &ModelEndpoint, system_prompt: &str, user_prompt: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        endpoint.provider, endpoint.model, system_prompt, user_prompt
    )
}

/// LLM客户端 - 按模型角色持有两个provider客户端
#[derive(Clone)]
pub struct LLMClient {
    config: LLMConfig,
    research: ProviderClient,
    reasoning: ProviderClient,
    cache: Arc<CacheManager>,
}

impl LLMClient {
    /// 创建新的LLM客户端
    pub fn new(config: &Config) -> Result<Self> {
        let research = ProviderClient::new(&config.llm.research)?;
        let reasoning = ProviderClient::new(&config.llm.reasoning)?;
        Ok(Self {
            config: config.llm.clone(),
            research,
            reasoning,
            cache: Arc::new(CacheManager::new(config.cache.clone())),
        })
    }

    fn endpoint(&self, role: ModelRole) -> (&ProviderClient, &ModelEndpoint) {
        match role {
            ModelRole::Research => (&self.research, &self.config.research),
            ModelRole::Reasoning => (&self.reasoning, &self.config.reasoning),
        }
    }

    /// 检查两个模型端点是否可用，始终真实请求而不读缓存
    pub async fn check_connection(&self) -> Result<()> {
        tracing::info!("🔄 正在检查模型连接...");
        for role in [ModelRole::Research, ModelRole::Reasoning] {
            let (_, endpoint) = self.endpoint(role);
            match self
                .prompt_uncached(role, CHECK_SYSTEM_PROMPT, CHECK_USER_PROMPT)
                .await
            {
                Ok(_) => tracing::info!("✅ 模型连接正常: {} / {}", endpoint.provider, endpoint.model),
                Err(e) => {
                    tracing::error!(
                        "❌ 模型连接失败: {} / {}: {}",
                        endpoint.provider,
                        endpoint.model,
                        e
                    );
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// 通用重试逻辑，重试间隔按指数增长
    async fn retry_with_backoff<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, anyhow::Error>>,
    {
        let max_retries = self.config.retry_attempts.max(1);
        let mut retries = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    retries += 1;
                    tracing::warn!(
                        "❌ 调用模型服务出错，重试中 (第 {} / {}次尝试): {}",
                        retries,
                        max_retries,
                        err
                    );
                    if retries >= max_retries {
                        return Err(err);
                    }
                    let delay = backoff_delay_ms(self.config.retry_delay_ms, retries);
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                }
            }
        }
    }

    /// 允许Agent调用工具的多轮对话，轮数用尽时改由无工具Agent收尾
    pub async fn prompt_with_tools(
        &self,
        role: ModelRole,
        system_prompt: &str,
        user_prompt: &str,
        toolbox: &Toolbox,
        tools: &[AgentTool],
    ) -> Result<String> {
        let (client, endpoint) = self.endpoint(role);
        let agent = client.create_agent_with_tools(
            &endpoint.model,
            system_prompt,
            &self.config,
            toolbox,
            tools,
        )?;
        let max_turns = self.config.max_tool_turns.max(1);

        let run = self
            .retry_with_backoff(|| async { run_tool_turns(&agent, user_prompt, max_turns).await })
            .await?;

        let (max_turns, transcript) = match run {
            ToolRun::Finished(answer) => return Ok(answer),
            ToolRun::Exhausted {
                max_turns,
                transcript,
            } => (max_turns, transcript),
        };

        tracing::info!("🔄 工具轮数用尽，改为直接推理收尾...");
        let wrap_up = transcript.wrap_up_prompt(user_prompt);
        match self.prompt_plain(role, system_prompt, &wrap_up).await {
            Ok(answer) => Ok(answer),
            Err(e) => {
                tracing::warn!("⚠️ 收尾推理失败，返回部分结果: {}", e);
                Ok(transcript.partial_answer(max_turns))
            }
        }
    }

    /// 单轮对话（不使用工具），启用缓存时命中直接返回
    pub async fn prompt_plain(
        &self,
        role: ModelRole,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String> {
        let (_, endpoint) = self.endpoint(role);
        let cache_key = prompt_cache_key(endpoint, system_prompt, user_prompt);

        if let Some(cached) = self
            .cache
            .get::<String>(PROMPT_CACHE_CATEGORY, &cache_key)
            .await?
        {
            return Ok(cached);
        }

        let response = self
            .prompt_uncached(role, system_prompt, user_prompt)
            .await?;

        if let Err(e) = self
            .cache
            .set(
                PROMPT_CACHE_CATEGORY,
                &cache_key,
                response.clone(),
                Some(&endpoint.model),
            )
            .await
        {
            tracing::warn!("⚠️ 写入缓存失败: {}", e);
        }
        Ok(response)
    }

    async fn prompt_uncached(
        &self,
        role: ModelRole,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String> {
        let (client, endpoint) = self.endpoint(role);
        let agent = client.create_agent(&endpoint.model, system_prompt, &self.config)?;
        self.retry_with_backoff(|| async { agent.prompt(user_prompt).await })
            .await
    }
}

#[async_trait]
impl AgentRuntime for LLMClient {
    async fn run_agent(
        &self,
        profile: &AgentProfile,
        user_prompt: &str,
        toolbox: Option<&Toolbox>,
    ) -> Result<String> {
        tracing::debug!("🤖 {} 开始执行", profile.name);
        match toolbox {
            Some(toolbox) if profile.uses_tools() => {
                self.prompt_with_tools(
                    profile.role,
                    &profile.instruction,
                    user_prompt,
                    toolbox,
                    &profile.tools,
                )
                .await
            }
            _ => {
                self.prompt_plain(profile.role, &profile.instruction, user_prompt)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, LLMProvider};
    use tempfile::TempDir;

    fn unreachable_endpoint(model: &str) -> ModelEndpoint {
        ModelEndpoint {
            provider: LLMProvider::OpenAI,
            api_key: "sk-test".to_string(),
            api_base_url: "http://127.0.0.1:9/v1".to_string(),
            model: model.to_string(),
        }
    }

    #[test]
    fn test_client_selects_endpoint_by_role() {
        let mut config = Config::default();
        config.llm.research = ModelEndpoint {
            provider: LLMProvider::OpenAI,
            api_key: "sk-test".to_string(),
            api_base_url: "http://localhost:1/v1".to_string(),
            model: "research-model".to_string(),
        };
        config.llm.reasoning = ModelEndpoint {
            provider: LLMProvider::OpenRouter,
            api_key: "or-test".to_string(),
            api_base_url: String::new(),
            model: "reasoning-model".to_string(),
        };

        let client = LLMClient::new(&config).unwrap();
        assert_eq!(client.endpoint(ModelRole::Research).1.model, "research-model");
        assert_eq!(client.endpoint(ModelRole::Reasoning).1.model, "reasoning-model");
    }

    #[test]
    fn test_backoff_delay_saturates() {
        assert_eq!(backoff_delay_ms(500, 1), 500);
        assert_eq!(backoff_delay_ms(500, 3), 2000);
        assert_eq!(backoff_delay_ms(500, 80), u64::MAX);
        assert_eq!(backoff_delay_ms(u64::MAX, 2), u64::MAX);
    }

    #[tokio::test]
    async fn test_cached_reply_does_not_mask_dead_endpoint() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.llm.research = unreachable_endpoint("research-model");
        config.llm.reasoning = unreachable_endpoint("reasoning-model");
        config.llm.retry_attempts = 1;
        config.cache = CacheConfig {
            enabled: true,
            cache_dir: temp_dir.path().to_path_buf(),
            expire_hours: 24,
        };
        let client = LLMClient::new(&config).unwrap();

        for role in [ModelRole::Research, ModelRole::Reasoning] {
            let endpoint = client.endpoint(role).1.clone();
            let key = prompt_cache_key(&endpoint, CHECK_SYSTEM_PROMPT, CHECK_USER_PROMPT);
            client
                .cache
                .set(
                    PROMPT_CACHE_CATEGORY,
                    &key,
                    "Hello! How can I help?".to_string(),
                    Some(&endpoint.model),
                )
                .await
                .unwrap();
        }

        let cached = client
            .prompt_plain(ModelRole::Research, CHECK_SYSTEM_PROMPT, CHECK_USER_PROMPT)
            .await
            .unwrap();
        assert_eq!(cached, "Hello! How can I help?");
        assert!(client.check_connection().await.is_err());
    }
}
