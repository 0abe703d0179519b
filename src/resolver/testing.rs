//! 单元测试共用的脚本化运行时和爬取服务

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::agents::AgentType;
use super::context::ResolverContext;
use crate::config::Config;
use crate::crawl::{CrawlPage, Crawler};
use crate::llm::client::{AgentProfile, AgentRuntime};
use crate::llm::tools::Toolbox;
use crate::recall::InMemoryMemoryService;
use crate::session::InMemorySessionStore;

pub const QUERY_PLAN: &str = r#"{"packages": [{"name": "pydantic", "constraint": "==1.10.2"}, {"name": "fastapi", "constraint": "==0.95.0"}], "queries": ["pydantic v2 regex deprecated pattern", "fastapi pydantic 2 compatibility"]}"#;
pub const DOCS_URLS: &str = r#"{"top_urls": ["https://docs.pydantic.dev/latest/migration/", "https://fastapi.tiangolo.com/release-notes/"]}"#;
pub const COMMUNITY_URLS: &str = r#"{"top_urls": ["https://stackoverflow.com/q/76313592", "https://docs.pydantic.dev/latest/migration/"]}"#;
pub const SURGEON_FIX: &str = "Pydantic 2 renamed `regex` to `pattern`.\n```requirements\npydantic==2.5.3\nfastapi==0.109.0\n```";
pub const VERDICT_PASS: &str = r#"{"passed": true, "issues": []}"#;
pub const VERDICT_FAIL: &str = r#"{"passed": false, "issues": ["fastapi 0.109.0 needs starlette>=0.35"]}"#;

/// 按 Agent 名称依次返回预设的输出，最后一条重复使用
#[derive(Default)]
pub struct ScriptedRuntime {
    scripts: Mutex<HashMap<String, VecDeque<String>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRuntime {
    pub fn script(self, agent: AgentType, responses: &[&str]) -> Self {
        self.scripts.lock().unwrap().insert(
            agent.to_string(),
            responses.iter().map(|r| r.to_string()).collect(),
        );
        self
    }

    pub fn calls_to(&self, agent: AgentType) -> usize {
        let name = agent.to_string();
        self.calls.lock().unwrap().iter().filter(|c| **c == name).count()
    }
}

#[async_trait]
impl AgentRuntime for ScriptedRuntime {
    async fn run_agent(
        &self,
        profile: &AgentProfile,
        _user_prompt: &str,
        _toolbox: Option<&Toolbox>,
    ) -> Result<String> {
        self.calls.lock().unwrap().push(profile.name.clone());
        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts
            .get_mut(&profile.name)
            .ok_or_else(|| anyhow!("no script for {}", profile.name))?;
        match queue.len() {
            0 => Err(anyhow!("script for {} is empty", profile.name)),
            1 => Ok(queue[0].clone()),
            _ => Ok(queue.pop_front().unwrap_or_default()),
        }
    }
}

/// 所有页面都返回足够长的正文
pub struct StaticCrawler;

#[async_trait]
impl Crawler for StaticCrawler {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn fetch_page(&self, url: &str) -> Result<CrawlPage> {
        Ok(CrawlPage::ok(
            url,
            format!(
                "Pydantic 2.0 migration: `regex` was renamed to `pattern`. {}",
                "x".repeat(400)
            ),
        ))
    }
}

pub fn happy_runtime() -> ScriptedRuntime {
    ScriptedRuntime::default()
        .script(AgentType::QueryCreator, &[QUERY_PLAN])
        .script(AgentType::DocsSearch, &[DOCS_URLS])
        .script(AgentType::CommunitySearch, &[COMMUNITY_URLS])
        .script(AgentType::CodeSurgeon, &[SURGEON_FIX])
}

pub fn test_context(runtime: Arc<ScriptedRuntime>, max_iterations: usize) -> ResolverContext {
    let mut config = Config::default();
    config.resolver.max_fix_iterations = max_iterations;
    ResolverContext {
        config,
        runtime,
        crawler: Arc::new(StaticCrawler),
        search: None,
        memory_service: Arc::new(InMemoryMemoryService::new()),
        sessions: Arc::new(InMemorySessionStore::new()),
    }
}
