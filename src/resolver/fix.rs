//! 有界的自我修正循环：提出方案 → 校验 → 验证 → 停止检查

use anyhow::Result;

use super::agents::{AgentType, STOP_CHECKER_AUTHOR};
use super::context::{ResolverContext, SessionRun};
use crate::llm::client::parse_json_output;
use crate::llm::tools::check_requirements;
use crate::memory::StateKeys;
use crate::types::{CandidateFix, ErrorReport, Finding, FixStatus, QueryPlan, VerificationVerdict};

pub const STATUS_SUCCESS: &str = "SUCCESS";
pub const STATUS_FAILED: &str = "FAILED";

/// 修复循环的结果
#[derive(Debug, Clone)]
pub struct FixOutcome {
    pub status: FixStatus,
    pub candidate: CandidateFix,
    pub issues: Vec<String>,
    pub iterations: usize,
}

pub async fn execute(
    context: &ResolverContext,
    run: &SessionRun,
    report: &ErrorReport,
    plan: &QueryPlan,
    findings: &[Finding],
) -> Result<FixOutcome> {
    let max_iterations = context.config.resolver.max_fix_iterations.max(1);
    let surgeon = AgentType::CodeSurgeon.profile();
    let verifier = AgentType::Verifier.profile();

    let mut last = CandidateFix::default();
    let mut issues: Vec<String> = Vec::new();

    for iteration in 1..=max_iterations {
        tracing::info!("🩺 修复循环 第 {} / {} 轮", iteration, max_iterations);

        let prompt = surgeon_prompt(report, plan, findings, &last, &issues);
        let output = context
            .runtime
            .run_agent(&surgeon, &prompt, Some(&run.toolbox))
            .await?;
        run.record(&surgeon.name, &output, false).await;

        let candidate = CandidateFix::from_model_output(&output);
        let check = check_requirements(&candidate.raw);
        issues = if check.is_valid() {
            let prompt = verifier_prompt(report, findings, &candidate, &check.summary());
            let verdict_text = context
                .runtime
                .run_agent(&verifier, &prompt, Some(&run.toolbox))
                .await?;
            run.record(&verifier.name, &verdict_text, false).await;
            verdict_issues(&verdict_text)
        } else {
            tracing::info!("❌ requirements校验未通过: {}", check.summary());
            check.into_issues()
        };

        let status = if issues.is_empty() {
            STATUS_SUCCESS
        } else {
            STATUS_FAILED
        };
        run.store_state(StateKeys::VERIFICATION_STATUS, status).await?;
        run.store_state(StateKeys::REQUIREMENTS, &candidate.raw).await?;
        run.store_state(StateKeys::SOLUTION, &output).await?;
        last = candidate;

        let stop = should_stop(run).await;
        run.record(
            STOP_CHECKER_AUTHOR,
            &format!("verification_status: {}", status),
            stop,
        )
        .await;
        if stop {
            tracing::info!("✅ 第 {} 轮验证通过", iteration);
            return Ok(FixOutcome {
                status: FixStatus::Verified,
                candidate: last,
                issues: Vec::new(),
                iterations: iteration,
            });
        }
    }

    tracing::warn!("⚠️ 修复循环达到上限 {} 轮，返回最后一版方案", max_iterations);
    Ok(FixOutcome {
        status: FixStatus::CapExceeded,
        candidate: last,
        issues,
        iterations: max_iterations,
    })
}

/// 读取会话状态中的验证结果，缺省视为失败
async fn should_stop(run: &SessionRun) -> bool {
    let status: Option<String> = run.get_state(StateKeys::VERIFICATION_STATUS).await;
    status.as_deref() == Some(STATUS_SUCCESS)
}

fn verdict_issues(text: &str) -> Vec<String> {
    match parse_json_output::<VerificationVerdict>(text) {
        Ok(verdict) if verdict.passed => Vec::new(),
        Ok(verdict) if verdict.issues.is_empty() => {
            vec!["Verifier rejected the candidate without listing issues".to_string()]
        }
        Ok(verdict) => verdict.issues,
        Err(e) => vec![format!("Verifier response could not be parsed: {}", e)],
    }
}

fn findings_section(findings: &[Finding]) -> String {
    if findings.is_empty() {
        return String::from(
            "## Research findings\nNo authoritative source found. Rely on your own knowledge and say so.\n",
        );
    }
    let mut section = String::from("## Research findings\n");
    for finding in findings {
        section.push_str(&format!("### {}\n{}\n\n", finding.url, finding.snippet));
    }
    section
}

fn surgeon_prompt(
    report: &ErrorReport,
    plan: &QueryPlan,
    findings: &[Finding],
    previous: &CandidateFix,
    issues: &[String],
) -> String {
    let mut prompt = report.to_prompt();
    if !plan.packages.is_empty() {
        prompt.push_str(&format!("\n## Packages involved\n{}\n", plan.package_list()));
    }
    prompt.push('\n');
    prompt.push_str(&findings_section(findings));

    if !issues.is_empty() {
        prompt.push_str("\n## Previous attempt was rejected\n```requirements\n");
        prompt.push_str(previous.raw.trim());
        prompt.push_str("\n```\nIssues:\n");
        for issue in issues {
            prompt.push_str(&format!("- {}\n", issue));
        }
    }
    prompt
}

fn verifier_prompt(
    report: &ErrorReport,
    findings: &[Finding],
    candidate: &CandidateFix,
    syntax_summary: &str,
) -> String {
    let mut prompt = report.to_prompt();
    prompt.push('\n');
    prompt.push_str(&findings_section(findings));
    prompt.push_str("\n## Proposed requirements.txt\n```requirements\n");
    prompt.push_str(candidate.raw.trim());
    prompt.push_str("\n```\n");
    if !candidate.explanation.is_empty() {
        prompt.push_str("\n## Surgeon's explanation\n");
        prompt.push_str(&candidate.explanation);
        prompt.push('\n');
    }
    prompt.push_str(&format!("\n## Syntax check\n{}\n", syntax_summary));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_issues() {
        assert!(verdict_issues(r#"{"passed": true, "issues": []}"#).is_empty());
        assert_eq!(
            verdict_issues(r#"```json
{"passed": false, "issues": ["fastapi 0.95 requires pydantic<2"]}
```"#),
            vec!["fastapi 0.95 requires pydantic<2".to_string()]
        );
        assert_eq!(verdict_issues(r#"{"passed": false}"#).len(), 1);
        assert!(verdict_issues("Verification Passed")[0].starts_with("Verifier response could not be parsed"));
    }

    #[test]
    fn test_surgeon_prompt_includes_feedback() {
        let report = ErrorReport::new("regex is deprecated", None);
        let previous = CandidateFix::from_model_output("```requirements\npydantic=2\n```");
        let issues = vec!["Invalid syntax: pydantic=2".to_string()];
        let prompt = surgeon_prompt(&report, &QueryPlan::default(), &[], &previous, &issues);
        assert!(prompt.contains("No authoritative source found"));
        assert!(prompt.contains("## Previous attempt was rejected"));
        assert!(prompt.contains("- Invalid syntax: pydantic=2"));

        let first = surgeon_prompt(&report, &QueryPlan::default(), &[], &CandidateFix::default(), &[]);
        assert!(!first.contains("Previous attempt"));
    }
}
