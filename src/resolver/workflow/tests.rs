use super::*;
use crate::memory::StateKeys;
use crate::resolver::agents::AgentType;
use crate::resolver::events::event_channel;
use crate::resolver::testing::*;
use crate::session::SessionStore;
use crate::types::FixStatus;

fn create_test_resolver(runtime: Arc<ScriptedRuntime>, max_iterations: usize) -> Resolver {
    Resolver::new(test_context(runtime, max_iterations))
}

fn request() -> ResolveRequest {
    ResolveRequest::new(ErrorReport::new(
        "ValueError: `regex` is removed, use `pattern` instead (pydantic deprecated)",
        Some("pydantic==1.10.2\nfastapi==0.95.0".to_string()),
    ))
}

#[tokio::test]
async fn test_stages_run_in_order_and_verify() {
    let runtime = Arc::new(happy_runtime().script(AgentType::Verifier, &[VERDICT_PASS]));
    let resolver = create_test_resolver(runtime.clone(), 3);
    let (tx, mut rx) = event_channel();

    let report = resolver.run(request(), Some(tx)).await.unwrap();
    assert_eq!(report.status, FixStatus::Verified);
    assert_eq!(report.iterations, 1);
    assert_eq!(report.candidate.raw, "pydantic==2.5.3\nfastapi==0.109.0");
    assert!(report.issues.is_empty());
    assert!(!report.no_authoritative_source);
    // 两个 Search Agent 的结果合并后去重
    assert_eq!(report.findings.len(), 3);

    let mut started = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let PipelineEvent::StageStarted { stage } = event {
            started.push(stage);
        }
    }
    assert_eq!(started, Stage::ALL.to_vec());
    assert_eq!(runtime.calls_to(AgentType::CodeSurgeon), 1);
    assert_eq!(runtime.calls_to(AgentType::Verifier), 1);
}

#[tokio::test]
async fn test_state_persisted_and_memory_saved() {
    let runtime = Arc::new(happy_runtime().script(AgentType::Verifier, &[VERDICT_PASS]));
    let resolver = create_test_resolver(runtime, 3);
    let report = resolver.run(request(), None).await.unwrap();

    let context = resolver.context();
    let session = context
        .sessions
        .get_session(&context.config.app_name, &context.config.user_id, &report.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        session.state.get(StateKeys::VERIFICATION_STATUS),
        Some(&serde_json::json!("SUCCESS"))
    );
    assert_eq!(
        session.state.get(StateKeys::PACKAGES),
        Some(&serde_json::json!("pydantic==1.10.2, fastapi==0.95.0"))
    );
    assert!(session.events.iter().any(|e| e.author == "Stop_Checker" && e.escalate));

    let recalled = context
        .memory_service
        .search_memory("pydantic regex pattern", 3)
        .await
        .unwrap();
    assert_eq!(recalled.len(), 1);
    assert_eq!(recalled[0].session_id, report.session_id);
}

#[tokio::test]
async fn test_loop_stops_at_cap_with_last_candidate() {
    let runtime = Arc::new(happy_runtime().script(AgentType::Verifier, &[VERDICT_FAIL]));
    let resolver = create_test_resolver(runtime.clone(), 2);

    let report = resolver.run(request(), None).await.unwrap();
    assert_eq!(report.status, FixStatus::CapExceeded);
    assert_eq!(report.iterations, 2);
    assert_eq!(report.candidate.raw, "pydantic==2.5.3\nfastapi==0.109.0");
    assert_eq!(report.issues, vec!["fastapi 0.109.0 needs starlette>=0.35"]);
    assert_eq!(runtime.calls_to(AgentType::CodeSurgeon), 2);
    assert!(report.warnings().iter().any(|w| w.contains("2 iteration(s)")));
}

#[tokio::test]
async fn test_verified_on_second_attempt() {
    let runtime = Arc::new(
        happy_runtime().script(AgentType::Verifier, &[VERDICT_FAIL, VERDICT_PASS]),
    );
    let resolver = create_test_resolver(runtime.clone(), 3);

    let report = resolver.run(request(), None).await.unwrap();
    assert!(report.is_verified());
    assert_eq!(report.iterations, 2);
    assert_eq!(runtime.calls_to(AgentType::Verifier), 2);
}

#[tokio::test]
async fn test_invalid_syntax_skips_verifier() {
    let runtime = Arc::new(
        happy_runtime()
            .script(AgentType::CodeSurgeon, &["```requirements\npydantic 2.5.3\n```"])
            .script(AgentType::Verifier, &[VERDICT_PASS]),
    );
    let resolver = create_test_resolver(runtime.clone(), 2);

    let report = resolver.run(request(), None).await.unwrap();
    assert_eq!(report.status, FixStatus::CapExceeded);
    assert_eq!(report.issues, vec!["Invalid syntax: pydantic 2.5.3"]);
    assert_eq!(runtime.calls_to(AgentType::Verifier), 0);
}

#[tokio::test]
async fn test_one_search_agent_failure_is_tolerated() {
    let runtime = Arc::new(
        ScriptedRuntime::default()
            .script(AgentType::QueryCreator, &[QUERY_PLAN])
            .script(AgentType::DocsSearch, &[DOCS_URLS])
            .script(AgentType::CodeSurgeon, &[SURGEON_FIX])
            .script(AgentType::Verifier, &[VERDICT_PASS]),
    );
    let resolver = create_test_resolver(runtime, 1);
    let (tx, mut rx) = event_channel();

    let report = resolver.run(request(), Some(tx)).await.unwrap();
    assert!(report.is_verified());
    assert_eq!(report.findings.len(), 2);

    let mut warnings = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let PipelineEvent::Warning { message } = event {
            warnings.push(message);
        }
    }
    assert!(warnings.iter().any(|w| w.starts_with("Community_Search_Agent failed")));
}

#[tokio::test]
async fn test_query_failure_is_surfaced() {
    let runtime = Arc::new(ScriptedRuntime::default());
    let resolver = create_test_resolver(runtime, 1);
    let err = resolver.run(request(), None).await.unwrap_err();
    assert!(err.to_string().contains("no script for Query_Creator_Agent"));
}

#[tokio::test]
async fn test_session_is_resumed_by_id() {
    let runtime = Arc::new(happy_runtime().script(AgentType::Verifier, &[VERDICT_PASS]));
    let resolver = create_test_resolver(runtime, 1);

    let first = resolver
        .run(request().with_session_id(Some("test_session_001".to_string())), None)
        .await
        .unwrap();
    let second = resolver
        .run(request().with_session_id(Some("test_session_001".to_string())), None)
        .await
        .unwrap();
    assert_eq!(first.session_id, "test_session_001");
    assert_eq!(second.session_id, "test_session_001");

    let context = resolver.context();
    let sessions = context
        .sessions
        .list_sessions(&context.config.app_name, &context.config.user_id)
        .await
        .unwrap();
    assert_eq!(sessions.len(), 1);
}

#[test]
fn test_timing_scope_records_phases_in_order() {
    let mut timing = TimingScope::new();
    timing.start_phase(Stage::Query);
    assert!(timing.end_phase(Stage::Query).is_some());
    timing.start_phase(Stage::Research);
    assert!(timing.end_phase(Stage::Research).is_some());
    assert!(timing.end_phase(Stage::Crawl).is_none());
    assert_eq!(timing.completed_phases(), vec![Stage::Query, Stage::Research]);
    assert!(timing.generate_timing_report().contains("- research:"));
}
