use anyhow::Result;

use super::agents::AgentType;
use super::context::{ResolverContext, SessionRun};
use crate::llm::client::parse_json_output;
use crate::memory::StateKeys;
use crate::recall::MemoryEntry;
use crate::types::{ErrorReport, PackageRef, QueryPlan};

/// 召回片段写入prompt时的最大长度
const RECALL_SNIPPET_CHARS: usize = 500;

/// 诊断错误报告，产出包列表和检索语句
pub async fn execute(
    context: &ResolverContext,
    run: &SessionRun,
    report: &ErrorReport,
) -> Result<QueryPlan> {
    let recalled = recall(context, run, report).await;

    let mut prompt = report.to_prompt();
    if !recalled.is_empty() {
        prompt.push_str("\n## Related past sessions\n");
        for entry in &recalled {
            let text: String = entry.text.chars().take(RECALL_SNIPPET_CHARS).collect();
            prompt.push_str(&format!("- [{}] {}\n", entry.timestamp, text));
        }
    }

    let agent = AgentType::QueryCreator;
    let output = context
        .runtime
        .run_agent(&agent.profile(), &prompt, Some(&run.toolbox))
        .await?;
    run.record(&agent.to_string(), &output, false).await;

    let plan = interpret(&output, report, run);
    tracing::info!(
        "🔎 识别到 {} 个包，生成 {} 条检索语句",
        plan.packages.len(),
        plan.queries.len()
    );

    // 模型可能已经通过工具写入了 packages，此时只在解析出包列表时覆盖
    if !plan.packages.is_empty() {
        run.store_state(StateKeys::PACKAGES, plan.package_list()).await?;
    }
    run.store_state(StateKeys::SEARCH_QUERIES, &plan.queries).await?;

    Ok(plan)
}

async fn recall(context: &ResolverContext, run: &SessionRun, report: &ErrorReport) -> Vec<MemoryEntry> {
    match context
        .memory_service
        .search_memory(&report.text, context.config.memory.recall_limit)
        .await
    {
        Ok(entries) => {
            if !entries.is_empty() {
                tracing::info!("🧠 召回 {} 条历史会话", entries.len());
            }
            entries
        }
        Err(e) => {
            run.warn(format!("Long-term memory recall failed: {}", e));
            Vec::new()
        }
    }
}

/// 解析 Query Creator 的输出，接受 QueryPlan 对象或纯字符串数组
fn interpret(output: &str, report: &ErrorReport, run: &SessionRun) -> QueryPlan {
    let mut plan = match parse_json_output::<QueryPlan>(output) {
        Ok(plan) => plan,
        Err(e) => match parse_json_output::<Vec<String>>(output) {
            Ok(queries) => QueryPlan {
                packages: Vec::new(),
                queries,
            },
            Err(_) => {
                run.warn(format!("Query plan could not be parsed: {}", e));
                QueryPlan::default()
            }
        },
    };

    plan.queries.retain(|q| !q.trim().is_empty());
    if plan.queries.is_empty() {
        plan.queries.push(fallback_query(&report.text));
    }

    if plan.packages.is_empty() {
        if let Some(requirements) = &report.requirements {
            plan.packages = requirements.lines().filter_map(PackageRef::parse).collect();
        }
    }
    plan
}

/// 取错误报告中第一行非空文本作为检索语句
fn fallback_query(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("python dependency conflict")
        .chars()
        .take(200)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_query_uses_first_line() {
        assert_eq!(
            fallback_query("\n  ImportError: cannot import name 'BaseSettings'\nTraceback"),
            "ImportError: cannot import name 'BaseSettings'"
        );
        assert_eq!(fallback_query("   "), "python dependency conflict");
    }
}
