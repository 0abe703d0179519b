//! LLM Provider支持模块

use anyhow::Result;
use rig::{
    agent::{Agent, AgentBuilder, AgentBuilderSimple},
    client::CompletionClient,
    completion::{CompletionModel, Prompt, PromptError},
    providers::gemini::completion::gemini_api_types::{AdditionalParameters, GenerationConfig},
};

use crate::{
    config::{LLMConfig, LLMProvider, ModelEndpoint},
    llm::tools::{AgentTool, Toolbox},
};

/// 把一个工具挂到构建器上
macro_rules! attach {
    ($builder:expr, $toolbox:expr, $tool:expr) => {
        match $tool {
            AgentTool::WebSearch => $builder.tool($toolbox.web_search()),
            AgentTool::SaveContext => $builder.tool($toolbox.save_context()),
            AgentTool::RetrieveContext => $builder.tool($toolbox.retrieve_context()),
            AgentTool::LoadMemory => $builder.tool($toolbox.load_memory()),
            AgentTool::ValidateRequirements => $builder.tool($toolbox.validate_requirements()),
        }
    };
}

/// 只挂载Agent声明的工具
fn build_with_tools<M: CompletionModel>(
    builder: AgentBuilder<M>,
    toolbox: &Toolbox,
    tools: &[AgentTool],
) -> Agent<M> {
    let Some((first, rest)) = tools.split_first() else {
        return builder.build();
    };
    let mut builder: AgentBuilderSimple<M> = attach!(builder, toolbox, *first);
    for tool in rest {
        builder = attach!(builder, toolbox, *tool);
    }
    builder.build()
}

/// 统一的Provider客户端枚举
#[derive(Clone)]
pub enum ProviderClient {
    OpenAI(rig::providers::openai::Client),
    OpenRouter(rig::providers::openrouter::Client),
    Anthropic(rig::providers::anthropic::Client),
    Gemini(rig::providers::gemini::Client),
    Ollama(rig::providers::ollama::Client),
}

fn gemini_params() -> Result<serde_json::Value> {
    let cfg = AdditionalParameters::default().with_config(GenerationConfig::default());
    Ok(serde_json::to_value(cfg)?)
}

impl ProviderClient {
    /// 根据端点配置创建相应的provider客户端
    pub fn new(endpoint: &ModelEndpoint) -> Result<Self> {
        match endpoint.provider {
            LLMProvider::OpenAI => {
                let client = rig::providers::openai::Client::builder(&endpoint.api_key)
                    .base_url(&endpoint.api_base_url)
                    .build();
                Ok(ProviderClient::OpenAI(client))
            }
            LLMProvider::OpenRouter => {
                let client =
                    rig::providers::openrouter::Client::builder(&endpoint.api_key).build();
                Ok(ProviderClient::OpenRouter(client))
            }
            LLMProvider::Anthropic => {
                let client =
                    rig::providers::anthropic::ClientBuilder::new(&endpoint.api_key).build()?;
                Ok(ProviderClient::Anthropic(client))
            }
            LLMProvider::Gemini => {
                let client = rig::providers::gemini::Client::builder(&endpoint.api_key).build()?;
                Ok(ProviderClient::Gemini(client))
            }
            LLMProvider::Ollama => {
                let client = rig::providers::ollama::Client::builder().build();
                Ok(ProviderClient::Ollama(client))
            }
        }
    }

    /// 创建不带工具的Agent
    pub fn create_agent(
        &self,
        model: &str,
        system_prompt: &str,
        config: &LLMConfig,
    ) -> Result<ProviderAgent> {
        let agent = match self {
            ProviderClient::OpenAI(client) => ProviderAgent::OpenAI(
                client
                    .completion_model(model)
                    .completions_api()
                    .into_agent_builder()
                    .preamble(system_prompt)
                    .max_tokens(config.max_tokens.into())
                    .temperature(config.temperature)
                    .build(),
            ),
            ProviderClient::OpenRouter(client) => ProviderAgent::OpenRouter(
                client
                    .agent(model)
                    .preamble(system_prompt)
                    .temperature(config.temperature)
                    .build(),
            ),
            ProviderClient::Anthropic(client) => ProviderAgent::Anthropic(
                client
                    .agent(model)
                    .preamble(system_prompt)
                    .max_tokens(config.max_tokens.into())
                    .temperature(config.temperature)
                    .build(),
            ),
            ProviderClient::Gemini(client) => ProviderAgent::Gemini(
                client
                    .agent(model)
                    .preamble(system_prompt)
                    .max_tokens(config.max_tokens.into())
                    .temperature(config.temperature)
                    .additional_params(gemini_params()?)
                    .build(),
            ),
            ProviderClient::Ollama(client) => ProviderAgent::Ollama(
                client
                    .agent(model)
                    .preamble(system_prompt)
                    .max_tokens(config.max_tokens.into())
                    .temperature(config.temperature)
                    .build(),
            ),
        };
        Ok(agent)
    }

    /// 创建挂载指定工具的Agent
    pub fn create_agent_with_tools(
        &self,
        model: &str,
        system_prompt: &str,
        config: &LLMConfig,
        toolbox: &Toolbox,
        tools: &[AgentTool],
    ) -> Result<ProviderAgent> {
        let agent = match self {
            ProviderClient::OpenAI(client) => ProviderAgent::OpenAI(build_with_tools(
                client
                    .completion_model(model)
                    .completions_api()
                    .into_agent_builder()
                    .preamble(system_prompt)
                    .max_tokens(config.max_tokens.into())
                    .temperature(config.temperature),
                toolbox,
                tools,
            )),
            ProviderClient::OpenRouter(client) => ProviderAgent::OpenRouter(build_with_tools(
                client
                    .agent(model)
                    .preamble(system_prompt)
                    .temperature(config.temperature),
                toolbox,
                tools,
            )),
            ProviderClient::Anthropic(client) => ProviderAgent::Anthropic(build_with_tools(
                client
                    .agent(model)
                    .preamble(system_prompt)
                    .max_tokens(config.max_tokens.into())
                    .temperature(config.temperature),
                toolbox,
                tools,
            )),
            ProviderClient::Gemini(client) => ProviderAgent::Gemini(build_with_tools(
                client
                    .agent(model)
                    .preamble(system_prompt)
                    .max_tokens(config.max_tokens.into())
                    .temperature(config.temperature)
                    .additional_params(gemini_params()?),
                toolbox,
                tools,
            )),
            ProviderClient::Ollama(client) => ProviderAgent::Ollama(build_with_tools(
                client
                    .agent(model)
                    .preamble(system_prompt)
                    .max_tokens(config.max_tokens.into())
                    .temperature(config.temperature),
                toolbox,
                tools,
            )),
        };
        Ok(agent)
    }
}

/// 统一的Agent枚举
pub enum ProviderAgent {
    OpenAI(Agent<rig::providers::openai::CompletionModel>),
    OpenRouter(Agent<rig::providers::openrouter::CompletionModel>),
    Anthropic(Agent<rig::providers::anthropic::completion::CompletionModel>),
    Gemini(Agent<rig::providers::gemini::completion::CompletionModel>),
    Ollama(Agent<rig::providers::ollama::CompletionModel<reqwest::Client>>),
}

impl ProviderAgent {
    /// 执行单轮prompt
    pub async fn prompt(&self, prompt: &str) -> Result<String> {
        match self {
            ProviderAgent::OpenAI(agent) => agent.prompt(prompt).await.map_err(|e| e.into()),
            ProviderAgent::OpenRouter(agent) => agent.prompt(prompt).await.map_err(|e| e.into()),
            ProviderAgent::Anthropic(agent) => agent.prompt(prompt).await.map_err(|e| e.into()),
            ProviderAgent::Gemini(agent) => agent.prompt(prompt).await.map_err(|e| e.into()),
            ProviderAgent::Ollama(agent) => agent.prompt(prompt).await.map_err(|e| e.into()),
        }
    }

    /// 执行多轮对话
    pub async fn multi_turn(
        &self,
        prompt: &str,
        max_iterations: usize,
    ) -> Result<String, PromptError> {
        match self {
            ProviderAgent::OpenAI(agent) => agent.prompt(prompt).multi_turn(max_iterations).await,
            ProviderAgent::OpenRouter(agent) => {
                agent.prompt(prompt).multi_turn(max_iterations).await
            }
            ProviderAgent::Anthropic(agent) => {
                agent.prompt(prompt).multi_turn(max_iterations).await
            }
            ProviderAgent::Gemini(agent) => agent.prompt(prompt).multi_turn(max_iterations).await,
            ProviderAgent::Ollama(agent) => agent.prompt(prompt).multi_turn(max_iterations).await,
        }
    }
}
