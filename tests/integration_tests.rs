use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

use package_doctor::config::{Config, CrawlBackend};
use package_doctor::llm::client::{AgentProfile, AgentRuntime};
use package_doctor::llm::tools::Toolbox;
use package_doctor::memory::StateKeys;
use package_doctor::resolver::{PipelineEvent, event_channel};
use package_doctor::types::{ErrorReport, FixStatus};
use package_doctor::{ResolveRequest, Resolver, ResolverContext};

const ERROR_LOG: &str = "Traceback (most recent call last):\n  File \"app.py\", line 3, in <module>\n    from pydantic import BaseSettings\nImportError: cannot import name 'BaseSettings' from 'pydantic'";
const REQUIREMENTS: &str = "pydantic==2.5.3\nfastapi==0.95.0\n";
const DOCS_URL: &str = "https://docs.pydantic.dev/latest/migration/";
const THREAD_URL: &str = "https://stackoverflow.com/q/76313592";

/// 按 Agent 名称返回预设输出，最后一条重复使用
struct ScriptedRuntime {
    scripts: Mutex<HashMap<&'static str, (usize, Vec<&'static str>)>>,
}

impl ScriptedRuntime {
    fn new(verdicts: &[&'static str]) -> Self {
        let mut scripts = HashMap::new();
        scripts.insert(
            "Query_Creator_Agent",
            (
                0,
                vec![r#"{"packages": [{"name": "pydantic", "constraint": "==2.5.3"}], "queries": ["pydantic BaseSettings moved pydantic-settings"]}"#],
            ),
        );
        scripts.insert(
            "Docs_Search_Agent",
            (0, vec![r#"{"top_urls": ["https://docs.pydantic.dev/latest/migration/"]}"#]),
        );
        scripts.insert(
            "Community_Search_Agent",
            (0, vec!["See https://stackoverflow.com/q/76313592 for the accepted answer."]),
        );
        scripts.insert(
            "Code_Surgeon_Agent",
            (
                0,
                vec!["BaseSettings moved to pydantic-settings.\n```requirements\npydantic==2.5.3\npydantic-settings==2.1.0\nfastapi==0.109.0\n```"],
            ),
        );
        scripts.insert("Verification_Agent", (0, verdicts.to_vec()));
        Self {
            scripts: Mutex::new(scripts),
        }
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
        let mut scripts = self.scripts.lock().unwrap();
        let (cursor, responses) = scripts
            .get_mut(profile.name.as_str())
            .ok_or_else(|| anyhow!("no script for {}", profile.name))?;
        let index = (*cursor).min(responses.len() - 1);
        *cursor += 1;
        Ok(responses[index].to_string())
    }
}

/// 按请求体中的URL数量区分批量请求与单页请求
struct UrlCount(usize);

impl Match for UrlCount {
    fn matches(&self, request: &Request) -> bool {
        serde_json::from_slice::<serde_json::Value>(&request.body)
            .ok()
            .and_then(|body| body["urls"].as_array().map(|urls| urls.len()))
            .is_some_and(|count| count == self.0)
    }
}

struct UrlCountAtLeast(usize);

impl Match for UrlCountAtLeast {
    fn matches(&self, request: &Request) -> bool {
        serde_json::from_slice::<serde_json::Value>(&request.body)
            .ok()
            .and_then(|body| body["urls"].as_array().map(|urls| urls.len()))
            .is_some_and(|count| count >= self.0)
    }
}

fn migration_guide() -> String {
    format!(
        "# Migration Guide\n`BaseSettings` has moved to the `pydantic-settings` package in Pydantic V2.\n{}",
        "Install pydantic-settings and import BaseSettings from it. ".repeat(12)
    )
}

fn create_test_config(crawl_server: &MockServer, db_path: &Path, max_iterations: usize) -> Config {
    let mut config = Config::default();
    config.crawl.backend = CrawlBackend::Crawl4Ai;
    config.crawl.crawl4ai_base_url = crawl_server.uri();
    config.crawl.crawl4ai_api_token = None;
    config.crawl.timeout_seconds = 5;
    config.search.api_key = String::new();
    config.memory.pinecone_api_key = String::new();
    config.session.database_url = format!("sqlite://{}", db_path.display());
    config.resolver.max_fix_iterations = max_iterations;
    config
}

fn create_test_resolver(config: Config, verdicts: &[&'static str]) -> Resolver {
    let runtime: Arc<dyn AgentRuntime> = Arc::new(ScriptedRuntime::new(verdicts));
    Resolver::new(ResolverContext::with_runtime(config, runtime).unwrap())
}

fn request() -> ResolveRequest {
    ResolveRequest::new(ErrorReport::new(ERROR_LOG, Some(REQUIREMENTS.to_string())))
}

#[tokio::test]
async fn test_thin_batch_falls_back_to_adaptive_crawl() {
    let crawl_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/crawl"))
        .and(UrlCountAtLeast(2))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "results": [
                {"url": DOCS_URL, "success": true, "markdown": "# Migration Guide"},
                {"url": THREAD_URL, "success": false, "error_message": "403 Forbidden"}
            ]
        })))
        .expect(1)
        .mount(&crawl_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/crawl"))
        .and(UrlCount(1))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "results": [
                {"url": DOCS_URL, "success": true, "markdown": {"raw_markdown": migration_guide()}}
            ]
        })))
        .mount(&crawl_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(&crawl_server, &temp_dir.path().join("sessions.db"), 3);
    let resolver = create_test_resolver(config, &[r#"{"passed": true, "issues": []}"#]);

    let report = resolver.run(request(), None).await.unwrap();

    assert_eq!(report.status, FixStatus::Verified);
    assert!(!report.no_authoritative_source);
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].url, DOCS_URL);
    assert!(report.candidate.raw.contains("pydantic-settings==2.1.0"));
}

#[tokio::test]
async fn test_crawl_service_outage_is_not_authoritative() {
    let crawl_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/crawl"))
        .respond_with(ResponseTemplate::new(503).set_body_string("service unavailable"))
        .mount(&crawl_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(&crawl_server, &temp_dir.path().join("sessions.db"), 3);
    let resolver = create_test_resolver(config, &[r#"{"passed": true, "issues": []}"#]);

    let (sink, mut events) = event_channel();
    let report = resolver.run(request(), Some(sink)).await.unwrap();

    assert!(report.no_authoritative_source);
    assert!(report.findings.is_empty());
    assert!(report.is_verified());
    assert!(report.warnings().iter().any(|w| w.contains("No authoritative source")));

    let mut warned = false;
    while let Ok(event) = events.try_recv() {
        if let PipelineEvent::Warning { message } = event {
            warned |= message.contains("No authoritative source found");
        }
    }
    assert!(warned);
}

#[tokio::test]
async fn test_session_survives_restart() {
    let crawl_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/crawl"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "results": [
                {"url": DOCS_URL, "success": true, "markdown": migration_guide()},
                {"url": THREAD_URL, "success": true, "markdown": migration_guide()}
            ]
        })))
        .mount(&crawl_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("sessions.db");

    let first = create_test_resolver(
        create_test_config(&crawl_server, &db_path, 3),
        &[r#"{"passed": true, "issues": []}"#],
    );
    let report = first
        .run(request().with_session_id(Some("restart_session".to_string())), None)
        .await
        .unwrap();
    assert_eq!(report.session_id, "restart_session");
    drop(first);

    let config = create_test_config(&crawl_server, &db_path, 3);
    let second = create_test_resolver(config.clone(), &[r#"{"passed": true, "issues": []}"#]);
    let context = second.context();
    let restored = context
        .sessions
        .get_session(&config.app_name, &config.user_id, "restart_session")
        .await
        .unwrap()
        .expect("session should be persisted in sqlite");
    assert_eq!(
        restored.state.get(StateKeys::VERIFICATION_STATUS),
        Some(&json!("SUCCESS"))
    );
    let first_run_events = restored.events.len();
    assert!(first_run_events > 0);

    second
        .run(request().with_session_id(Some("restart_session".to_string())), None)
        .await
        .unwrap();
    let resumed = context
        .sessions
        .get_session(&config.app_name, &config.user_id, "restart_session")
        .await
        .unwrap()
        .unwrap();
    assert!(resumed.events.len() > first_run_events);

    let summaries = context
        .sessions
        .list_sessions(&config.app_name, &config.user_id)
        .await
        .unwrap();
    assert_eq!(summaries.len(), 1);
}

#[tokio::test]
async fn test_fix_loop_stops_at_cap() {
    let crawl_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/crawl"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "results": [
                {"url": DOCS_URL, "success": true, "markdown": migration_guide()},
                {"url": THREAD_URL, "success": true, "markdown": migration_guide()}
            ]
        })))
        .mount(&crawl_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(&crawl_server, &temp_dir.path().join("sessions.db"), 2);
    let resolver = create_test_resolver(
        config,
        &[r#"{"passed": false, "issues": ["fastapi 0.109.0 needs starlette>=0.35"]}"#],
    );

    let report = resolver.run(request(), None).await.unwrap();

    assert_eq!(report.status, FixStatus::CapExceeded);
    assert_eq!(report.iterations, 2);
    assert_eq!(report.issues, vec!["fastapi 0.109.0 needs starlette>=0.35".to_string()]);
    assert!(!report.no_authoritative_source);
}
