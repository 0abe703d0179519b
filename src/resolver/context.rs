use anyhow::Result;
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;

use super::events::{EventSender, PipelineEvent};
use crate::config::Config;
use crate::crawl::{Crawler, create_crawler};
use crate::llm::client::{AgentRuntime, LLMClient};
use crate::llm::tools::Toolbox;
use crate::memory::{Memory, MemoryScope, SharedState};
use crate::recall::{MemoryService, open_memory_service};
use crate::search::{SearchEngine, create_search_engine};
use crate::session::{Session, SessionEvent, SessionStore, open_session_store};

/// 求解流程依赖的全部外部服务
#[derive(Clone)]
pub struct ResolverContext {
    pub config: Config,
    /// 模型调用入口
    pub runtime: Arc<dyn AgentRuntime>,
    pub crawler: Arc<dyn Crawler>,
    /// 未配置搜索服务时为空
    pub search: Option<Arc<dyn SearchEngine>>,
    /// 长期记忆
    pub memory_service: Arc<dyn MemoryService>,
    pub sessions: Arc<dyn SessionStore>,
}

impl ResolverContext {
    /// 按配置创建真实的服务
    pub fn new(config: Config) -> Result<Self> {
        let runtime: Arc<dyn AgentRuntime> = Arc::new(LLMClient::new(&config)?);
        Self::with_runtime(config, runtime)
    }

    /// 使用给定的模型运行时，其余服务按配置创建
    pub fn with_runtime(config: Config, runtime: Arc<dyn AgentRuntime>) -> Result<Self> {
        let crawler = create_crawler(&config.crawl)?;
        let search = create_search_engine(&config.search);
        let memory_service = open_memory_service(&config.memory);
        let sessions = open_session_store(&config.session)?;
        Ok(Self {
            config,
            runtime,
            crawler,
            search,
            memory_service,
            sessions,
        })
    }
}

/// 单次求解的运行期状态：会话 + 共享状态 + 工具 + 事件出口
pub struct SessionRun {
    pub session: Session,
    pub state: SharedState,
    pub toolbox: Toolbox,
    sessions: Arc<dyn SessionStore>,
    sink: Option<EventSender>,
}

impl SessionRun {
    pub fn new(context: &ResolverContext, session: Session, sink: Option<EventSender>) -> Self {
        let state = Memory::from_state(&session.state).shared();
        let toolbox = Toolbox::new(
            state.clone(),
            context.search.clone(),
            context.memory_service.clone(),
        )
        .with_limits(
            context.config.search.max_results,
            context.config.memory.recall_limit,
        );
        Self {
            session,
            state,
            toolbox,
            sessions: context.sessions.clone(),
            sink,
        }
    }

    /// 推送事件；接收端已关闭时忽略
    pub fn emit(&self, event: PipelineEvent) {
        if let Some(sink) = &self.sink {
            let _ = sink.send(event);
        }
    }

    /// 记录一条会话事件并同步推送
    pub async fn record(&self, author: &str, content: &str, escalate: bool) {
        let event = SessionEvent::new(author, content).with_escalate(escalate);
        if let Err(e) = self.sessions.append_event(&self.session, event).await {
            tracing::warn!("⚠️ 写入会话事件失败: {}", e);
        }
        self.emit(PipelineEvent::AgentMessage {
            agent: author.to_string(),
            content: content.to_string(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("⚠️ {}", message);
        self.emit(PipelineEvent::Warning { message });
    }

    pub async fn store_state<T: Serialize>(&self, key: &str, value: T) -> Result<()> {
        self.state.lock().await.store(MemoryScope::STATE, key, value)
    }

    pub async fn get_state<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.state.lock().await.get(MemoryScope::STATE, key)
    }

    /// 将共享状态写回会话存储
    pub async fn persist_state(&self) -> Result<()> {
        let snapshot = self.state.lock().await.state_snapshot();
        self.sessions.update_state(&self.session, snapshot).await
    }
}
