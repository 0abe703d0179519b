//! 流水线中的声明式 Agent：名称 + 指令 + 模型角色 + 工具列表

use std::fmt::Display;

use crate::llm::client::{AgentProfile, ModelRole, schema_instruction};
use crate::llm::tools::AgentTool;
use crate::types::{QueryPlan, VerificationVerdict};

/// 爬取阶段写入会话事件时使用的作者名
pub const WEB_CRAWL_AUTHOR: &str = "Web_Crawl_Agent";
/// 停止检查写入会话事件时使用的作者名
pub const STOP_CHECKER_AUTHOR: &str = "Stop_Checker";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentType {
    QueryCreator,
    DocsSearch,
    CommunitySearch,
    CodeSurgeon,
    Verifier,
}

impl Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            AgentType::QueryCreator => "Query_Creator_Agent",
            AgentType::DocsSearch => "Docs_Search_Agent",
            AgentType::CommunitySearch => "Community_Search_Agent",
            AgentType::CodeSurgeon => "Code_Surgeon_Agent",
            AgentType::Verifier => "Verification_Agent",
        };
        write!(f, "{}", str)
    }
}

impl AgentType {
    pub fn profile(&self) -> AgentProfile {
        match self {
            AgentType::QueryCreator => query_creator(),
            AgentType::DocsSearch => docs_search(),
            AgentType::CommunitySearch => community_search(),
            AgentType::CodeSurgeon => code_surgeon(),
            AgentType::Verifier => verifier(),
        }
    }

    /// 每个 Agent 只能调用自己声明的工具
    pub fn tools(&self) -> &'static [AgentTool] {
        match self {
            AgentType::QueryCreator => &[
                AgentTool::WebSearch,
                AgentTool::SaveContext,
                AgentTool::LoadMemory,
            ],
            // 两个检索 Agent 并发执行，不写共享状态
            AgentType::DocsSearch | AgentType::CommunitySearch => &[AgentTool::WebSearch],
            AgentType::CodeSurgeon => &[AgentTool::RetrieveContext, AgentTool::SaveContext],
            AgentType::Verifier => &[AgentTool::ValidateRequirements, AgentTool::SaveContext],
        }
    }
}

fn profile(agent: AgentType, description: &str, instruction: String, role: ModelRole) -> AgentProfile {
    AgentProfile {
        name: agent.to_string(),
        description: description.to_string(),
        instruction,
        role,
        tools: agent.tools().to_vec(),
    }
}

fn query_creator() -> AgentProfile {
    let instruction = format!(
        r#"You are the "Dependency Detective", an expert in diagnosing Python environment conflicts, legacy code rot and version mismatch errors.
Use the `web_search` tool if you do not know the packages or the error involved.
Use `load_memory` to recall previous conversations, especially when the user refers to "last time" or a previous error.

YOUR GOAL:
1. Identify the specific packages (and versions, when given) involved in the report.
2. Save them to the session state with `save_context` using key `packages` and a comma separated value.
3. Generate targeted technical search queries that help a downstream crawler find the exact fix.

ANALYSIS PROCESS:
- Decide whether this is a syntax error or a compatibility error. Look for keywords like "deprecated", "mismatch", "attribute error".
- Look at the whole stack of libraries involved.
- Target "breaking changes", "migration guides" and "compatibility matrices" for the package combinations.

{}"#,
        schema_instruction::<QueryPlan>()
    );
    profile(
        AgentType::QueryCreator,
        "Diagnoses the error report and plans search queries",
        instruction,
        ModelRole::Research,
    )
}

fn docs_search() -> AgentProfile {
    let instruction = r#"You are the "Official Docs Researcher".

YOUR GOAL:
Search for official documentation, API references, changelogs and migration guides using the `web_search` tool.
Prefer domains like *.org, *.io, *.dev, pypi.org and official GitHub repositories.

INPUT: a list of search queries.
OUTPUT: the top 4 most relevant OFFICIAL URLs, as JSON:
{"top_urls": ["url1", "url2", ...]}"#;
    profile(
        AgentType::DocsSearch,
        "Searches official documentation",
        instruction.to_string(),
        ModelRole::Research,
    )
}

fn community_search() -> AgentProfile {
    let instruction = r#"You are the "Community Researcher".

YOUR GOAL:
Search for community discussions, bug reports and Q&A threads using the `web_search` tool.
Prefer sites like stackoverflow.com, github.com issues and discussions, reddit.com.

INPUT: a list of search queries.
OUTPUT: the top 4 most relevant COMMUNITY URLs, as JSON:
{"top_urls": ["url1", "url2", ...]}"#;
    profile(
        AgentType::CommunitySearch,
        "Searches community discussions",
        instruction.to_string(),
        ModelRole::Research,
    )
}

fn code_surgeon() -> AgentProfile {
    let instruction = r#"You are the "Code Surgeon", an expert Python developer specialized in dependency resolution.

YOUR TASK:
1. Use `retrieve_context` to read `packages` and `search_queries` stored earlier in the session.
2. Analyze the dependency conflict described in the error report.
3. Use the research findings to determine versions that work together.
4. Produce a clean requirements.txt with the conflict resolved.
5. If a previous attempt was rejected, fix every listed issue.

OUTPUT FORMAT:
- A clear explanation of the issue.
- The complete updated requirements.txt inside a single fenced block:
```requirements
package==version
```
- Migration notes if breaking changes exist."#;
    profile(
        AgentType::CodeSurgeon,
        "Proposes a fixed requirements file",
        instruction.to_string(),
        ModelRole::Reasoning,
    )
}

fn verifier() -> AgentProfile {
    let instruction = format!(
        r#"You are the "Quality Assurance Specialist" for Python dependency files.

YOUR TASK:
1. Review the requirements.txt proposed by the Code Surgeon against the error report and the research findings.
2. Use the `validate_requirements` tool to check the syntax.
3. Check that the pinned versions are mutually compatible and actually fix the reported error.
4. Report every problem you find so the Code Surgeon can fix it. Set "passed" to true only when there are no problems.

{}"#,
        schema_instruction::<VerificationVerdict>()
    );
    profile(
        AgentType::Verifier,
        "Checks the proposed requirements file",
        instruction,
        ModelRole::Reasoning,
    )
}
