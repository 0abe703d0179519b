use anyhow::{Result, anyhow};
use serde::Deserialize;

use super::agents::AgentType;
use super::context::{ResolverContext, SessionRun};
use crate::crawl::extract_urls;
use crate::llm::client::parse_json_output;
use crate::memory::StateKeys;
use crate::types::QueryPlan;

/// Search Agent 的输出格式
#[derive(Debug, Deserialize)]
struct TopUrls {
    #[serde(default)]
    top_urls: Vec<String>,
}

/// 并发执行两个 Search Agent，合并候选URL（文档优先）
pub async fn execute(
    context: &ResolverContext,
    run: &SessionRun,
    plan: &QueryPlan,
) -> Result<Vec<String>> {
    let prompt = research_prompt(plan);
    let docs_profile = AgentType::DocsSearch.profile();
    let community_profile = AgentType::CommunitySearch.profile();

    let (docs, community) = tokio::join!(
        context
            .runtime
            .run_agent(&docs_profile, &prompt, Some(&run.toolbox)),
        context
            .runtime
            .run_agent(&community_profile, &prompt, Some(&run.toolbox)),
    );

    let cap = context.config.resolver.max_urls_per_search;
    let mut groups = Vec::with_capacity(2);
    let mut failures = Vec::new();
    for (agent, result) in [
        (AgentType::DocsSearch, docs),
        (AgentType::CommunitySearch, community),
    ] {
        match result {
            Ok(output) => {
                run.record(&agent.to_string(), &output, false).await;
                groups.push(candidate_urls(&output, cap));
            }
            Err(e) => {
                run.warn(format!("{} failed: {}", agent, e));
                failures.push(e);
            }
        }
    }

    if groups.is_empty() {
        let first = failures
            .into_iter()
            .next()
            .unwrap_or_else(|| anyhow!("research produced no output"));
        return Err(first);
    }

    let urls = merge_urls(groups);
    tracing::info!("🌐 收集到 {} 个候选URL", urls.len());
    run.store_state(StateKeys::CANDIDATE_URLS, &urls).await?;
    Ok(urls)
}

fn research_prompt(plan: &QueryPlan) -> String {
    let mut prompt = String::from("## Search queries\n");
    for query in &plan.queries {
        prompt.push_str(&format!("- {}\n", query));
    }
    if !plan.packages.is_empty() {
        prompt.push_str(&format!("\n## Packages\n{}\n", plan.package_list()));
    }
    prompt
}

/// 优先解析 `{"top_urls": [...]}`，否则从文本中提取URL
fn candidate_urls(output: &str, cap: usize) -> Vec<String> {
    let urls = match parse_json_output::<TopUrls>(output) {
        Ok(parsed) if !parsed.top_urls.is_empty() => parsed
            .top_urls
            .iter()
            .flat_map(|url| extract_urls(url))
            .collect(),
        _ => extract_urls(output),
    };
    urls.into_iter().take(cap).collect()
}

/// 按组的先后顺序合并并去重
fn merge_urls(groups: Vec<Vec<String>>) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for url in groups.into_iter().flatten() {
        if !merged.contains(&url) {
            merged.push(url);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_urls_from_json_is_capped() {
        let output = r#"## Official Docs Results
{"top_urls": ["https://docs.pydantic.dev/2.5/migration/", "https://fastapi.tiangolo.com/release-notes/", "https://pypi.org/project/pydantic/", "https://github.com/pydantic/pydantic/releases", "https://example.org/fifth"]}"#;
        let urls = candidate_urls(output, 4);
        assert_eq!(urls.len(), 4);
        assert_eq!(urls[0], "https://docs.pydantic.dev/2.5/migration/");
        assert!(!urls.contains(&"https://example.org/fifth".to_string()));
    }

    #[test]
    fn test_candidate_urls_from_free_text() {
        let output = "See https://stackoverflow.com/q/123, and also https://github.com/tiangolo/fastapi/issues/9709.";
        let urls = candidate_urls(output, 4);
        assert_eq!(
            urls,
            vec![
                "https://stackoverflow.com/q/123".to_string(),
                "https://github.com/tiangolo/fastapi/issues/9709".to_string(),
            ]
        );
    }

    #[test]
    fn test_merge_urls_docs_first_and_dedup() {
        let docs = vec!["https://a.dev".to_string(), "https://b.dev".to_string()];
        let community = vec!["https://b.dev".to_string(), "https://c.com".to_string()];
        assert_eq!(
            merge_urls(vec![docs, community]),
            vec!["https://a.dev", "https://b.dev", "https://c.com"]
        );
    }

    #[test]
    fn test_research_prompt_lists_queries() {
        let plan = QueryPlan {
            packages: vec![],
            queries: vec!["pydantic regex deprecated".to_string()],
        };
        let prompt = research_prompt(&plan);
        assert!(prompt.contains("- pydantic regex deprecated"));
        assert!(!prompt.contains("## Packages"));
    }
}
