use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::tools::{AgentTool, Toolbox};

/// Agent 使用哪一个模型端点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    /// 检索类任务：生成查询、搜索
    Research,
    /// 推理类任务：修复与验证
    Reasoning,
}

/// 声明式的 Agent 配置：名称 + 指令 + 模型角色 + 工具列表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub name: String,
    pub description: String,
    pub instruction: String,
    pub role: ModelRole,
    /// 为空时按单轮对话执行
    pub tools: Vec<AgentTool>,
}

impl AgentProfile {
    pub fn uses_tools(&self) -> bool {
        !self.tools.is_empty()
    }

    pub fn tool_names(&self) -> Vec<&'static str> {
        self.tools.iter().map(AgentTool::name).collect()
    }
}

/// 执行 Agent 的运行时
///
/// 流水线中的每个阶段都只通过这个接口调用模型，测试中可以替换为脚本化的实现。
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// 以 `profile.instruction` 作为系统提示执行一次 Agent，返回模型的最终文本。
    /// 只挂载 `profile.tools` 中声明的工具；`toolbox` 为空或没有声明工具时按单轮对话执行。
    async fn run_agent(
        &self,
        profile: &AgentProfile,
        user_prompt: &str,
        toolbox: Option<&Toolbox>,
    ) -> Result<String>;
}
