use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{AdaptiveConfig, CrawlPage, Crawler};
use crate::config::CrawlConfig;
use crate::types::Finding;

/// 与版本相关的关键词，小写匹配
const VERSION_KEYWORDS: &[&str] = &[
    "version",
    "==",
    ">=",
    "<=",
    "requires",
    "compatib",
    "release",
    "deprecat",
    "changelog",
];

/// 批量爬取结果的充分性判定
#[derive(Debug, Clone, PartialEq)]
pub struct SufficiencyCriteria {
    /// 成功页面的文本总量必须超过该值
    pub min_total_chars: usize,
    pub allow_failed_pages: bool,
    pub require_version_keywords: bool,
}

impl Default for SufficiencyCriteria {
    fn default() -> Self {
        Self {
            min_total_chars: 500,
            allow_failed_pages: false,
            require_version_keywords: false,
        }
    }
}

impl From<&CrawlConfig> for SufficiencyCriteria {
    fn from(config: &CrawlConfig) -> Self {
        Self {
            min_total_chars: config.min_total_chars,
            allow_failed_pages: config.allow_failed_pages,
            require_version_keywords: config.require_version_keywords,
        }
    }
}

impl SufficiencyCriteria {
    /// 批量结果是否可以直接使用
    pub fn is_sufficient(&self, pages: &[CrawlPage]) -> bool {
        if pages.is_empty() {
            return false;
        }
        if !self.allow_failed_pages && pages.iter().any(|page| !page.success) {
            return false;
        }
        self.has_enough_content(pages)
    }

    /// 只看成功页面的内容量与关键词，不关心失败页面
    pub fn has_enough_content(&self, pages: &[CrawlPage]) -> bool {
        let successful: Vec<&CrawlPage> = pages.iter().filter(|page| page.success).collect();
        let total_chars: usize = successful
            .iter()
            .map(|page| page.markdown.trim().chars().count())
            .sum();
        if total_chars <= self.min_total_chars {
            return false;
        }
        if self.require_version_keywords {
            return successful.iter().any(|page| {
                let text = page.markdown.to_lowercase();
                VERSION_KEYWORDS.iter().any(|keyword| text.contains(keyword))
            });
        }
        true
    }
}

/// 实际采用的爬取策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStrategy {
    Batch,
    AdaptiveFallback,
    /// 没有候选URL
    Skipped,
}

/// 爬取阶段的产出
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlOutcome {
    pub strategy: CrawlStrategy,
    /// 全部爬取过的页面（包括失败页面）
    pub pages: Vec<CrawlPage>,
    pub findings: Vec<Finding>,
    /// 是否拿到了可依赖的资料
    pub authoritative: bool,
}

impl CrawlOutcome {
    fn skipped() -> Self {
        Self {
            strategy: CrawlStrategy::Skipped,
            pages: Vec::new(),
            findings: Vec::new(),
            authoritative: false,
        }
    }
}

/// 先批量抓取，结果不充分时对第一个URL降级为自适应爬取
pub struct FallbackCrawlSelector {
    crawler: Arc<dyn Crawler>,
    criteria: SufficiencyCriteria,
    adaptive: AdaptiveConfig,
}

impl FallbackCrawlSelector {
    pub fn new(
        crawler: Arc<dyn Crawler>,
        criteria: SufficiencyCriteria,
        adaptive: AdaptiveConfig,
    ) -> Self {
        Self {
            crawler,
            criteria,
            adaptive,
        }
    }

    pub fn from_config(crawler: Arc<dyn Crawler>, config: &CrawlConfig) -> Self {
        Self::new(crawler, config.into(), config.into())
    }

    pub async fn crawl(&self, urls: &[String], query: &str) -> Result<CrawlOutcome> {
        let Some(first_url) = urls.first() else {
            tracing::warn!("⚠️ 没有候选URL，跳过爬取");
            return Ok(CrawlOutcome::skipped());
        };

        tracing::info!("🕷️ 批量爬取 {} 个URL...", urls.len());
        let batch = match self.crawler.batch_crawl(urls).await {
            Ok(pages) => pages,
            Err(e) => {
                // 服务级失败同样视为结果不充分，交给自适应策略再试一次
                tracing::warn!("⚠️ 批量爬取失败: {}", e);
                Vec::new()
            }
        };

        if self.criteria.is_sufficient(&batch) {
            tracing::info!("✅ 批量爬取结果充分");
            let findings = findings_from(&batch);
            return Ok(CrawlOutcome {
                strategy: CrawlStrategy::Batch,
                pages: batch,
                findings,
                authoritative: true,
            });
        }

        tracing::info!("⚠️ 批量爬取结果不充分，对 {} 启用自适应爬取", first_url);
        let adaptive_page = match self
            .crawler
            .adaptive_crawl(first_url, query, &self.adaptive)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!("⚠️ 自适应爬取失败: {}", e);
                CrawlPage::failed(first_url.clone(), e.to_string())
            }
        };

        // 成功的自适应结果替换同URL的批量页面，失败时保留批量页面
        let mut pages = batch;
        if adaptive_page.success {
            pages.retain(|page| page.url != adaptive_page.url);
            pages.push(adaptive_page);
        } else if !pages.iter().any(|page| page.url == adaptive_page.url) {
            pages.push(adaptive_page);
        }

        let authoritative = self.criteria.has_enough_content(&pages);
        if !authoritative {
            tracing::warn!("⚠️ 降级之后仍未找到权威资料");
        }

        Ok(CrawlOutcome {
            strategy: CrawlStrategy::AdaptiveFallback,
            findings: findings_from(&pages),
            pages,
            authoritative,
        })
    }
}

fn findings_from(pages: &[CrawlPage]) -> Vec<Finding> {
    pages
        .iter()
        .filter(|page| page.success && !page.markdown.trim().is_empty())
        .map(|page| Finding::new(page.url.clone(), &page.markdown))
        .collect()
}
