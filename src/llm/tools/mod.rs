//! 暴露给模型调用的工具

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::memory::SharedState;
use crate::recall::MemoryService;
use crate::search::SearchEngine;

pub mod memory_recall;
pub mod requirements_validator;
pub mod session_state;
pub mod web_search;

pub use memory_recall::AgentToolLoadMemory;
pub use requirements_validator::{
    AgentToolValidateRequirements, RequirementsCheck, check_requirements, validate_requirements,
};
pub use session_state::{AgentToolRetrieveContext, AgentToolSaveContext};
pub use web_search::AgentToolWebSearch;

/// Agent 可以声明的工具
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentTool {
    WebSearch,
    SaveContext,
    RetrieveContext,
    LoadMemory,
    ValidateRequirements,
}

impl AgentTool {
    /// 模型看到的工具名
    pub fn name(&self) -> &'static str {
        use rig::tool::Tool;
        match self {
            AgentTool::WebSearch => AgentToolWebSearch::NAME,
            AgentTool::SaveContext => AgentToolSaveContext::NAME,
            AgentTool::RetrieveContext => AgentToolRetrieveContext::NAME,
            AgentTool::LoadMemory => AgentToolLoadMemory::NAME,
            AgentTool::ValidateRequirements => AgentToolValidateRequirements::NAME,
        }
    }
}

/// 一次求解过程中工具共享的句柄
#[derive(Clone)]
pub struct Toolbox {
    state: SharedState,
    search: Option<Arc<dyn SearchEngine>>,
    memory_service: Arc<dyn MemoryService>,
    search_limit: usize,
    recall_limit: usize,
}

impl Toolbox {
    pub fn new(
        state: SharedState,
        search: Option<Arc<dyn SearchEngine>>,
        memory_service: Arc<dyn MemoryService>,
    ) -> Self {
        Self {
            state,
            search,
            memory_service,
            search_limit: 5,
            recall_limit: 3,
        }
    }

    pub fn with_limits(mut self, search_limit: usize, recall_limit: usize) -> Self {
        self.search_limit = search_limit;
        self.recall_limit = recall_limit;
        self
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn web_search(&self) -> AgentToolWebSearch {
        AgentToolWebSearch::new(self.search.clone(), self.search_limit)
    }

    pub fn save_context(&self) -> AgentToolSaveContext {
        AgentToolSaveContext::new(self.state.clone())
    }

    pub fn retrieve_context(&self) -> AgentToolRetrieveContext {
        AgentToolRetrieveContext::new(self.state.clone())
    }

    pub fn load_memory(&self) -> AgentToolLoadMemory {
        AgentToolLoadMemory::new(self.memory_service.clone(), self.recall_limit)
    }

    pub fn validate_requirements(&self) -> AgentToolValidateRequirements {
        AgentToolValidateRequirements
    }
}
