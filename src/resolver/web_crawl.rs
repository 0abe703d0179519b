use anyhow::Result;

use super::agents::WEB_CRAWL_AUTHOR;
use super::context::{ResolverContext, SessionRun};
use crate::crawl::{CrawlOutcome, CrawlStrategy, FallbackCrawlSelector};
use crate::memory::StateKeys;

/// 抓取候选URL，不充分时降级为自适应爬取
pub async fn execute(
    context: &ResolverContext,
    run: &SessionRun,
    urls: &[String],
) -> Result<CrawlOutcome> {
    let selector = FallbackCrawlSelector::from_config(context.crawler.clone(), &context.config.crawl);
    let outcome = selector
        .crawl(urls, &context.config.crawl.adaptive_query)
        .await?;

    run.record(WEB_CRAWL_AUTHOR, &summarize(&outcome), false).await;
    run.store_state(StateKeys::FINDINGS, &outcome.findings).await?;

    if !outcome.authoritative {
        run.warn("No authoritative source found");
    }
    Ok(outcome)
}

fn summarize(outcome: &CrawlOutcome) -> String {
    let strategy = match outcome.strategy {
        CrawlStrategy::Batch => "batch",
        CrawlStrategy::AdaptiveFallback => "adaptive fallback",
        CrawlStrategy::Skipped => "skipped (no candidate URLs)",
    };
    let failed = outcome.pages.iter().filter(|page| !page.success).count();
    let mut summary = format!(
        "Crawl strategy: {}\nPages: {} ({} failed)\nFindings: {}",
        strategy,
        outcome.pages.len(),
        failed,
        outcome.findings.len()
    );
    for finding in &outcome.findings {
        summary.push_str(&format!("\n- {}", finding.url));
    }
    summary
}
