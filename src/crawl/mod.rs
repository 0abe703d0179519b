//! 网页爬取
//!
//! 两种策略：批量快速抓取全部候选URL，以及从单个入口出发的自适应探索。
//! 具体走哪条路由 [`FallbackCrawlSelector`] 根据批量结果是否充分来决定。

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};

use crate::config::{CrawlBackend, CrawlConfig};

mod adaptive;
mod crawl4ai;
mod firecrawl;
mod selector;

pub use adaptive::{AdaptiveConfig, AdaptiveExplorer};
pub use crawl4ai::Crawl4AiCrawler;
pub use firecrawl::FirecrawlCrawler;
pub use selector::{CrawlOutcome, CrawlStrategy, FallbackCrawlSelector, SufficiencyCriteria};

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s<>"'`\)\]\}]+"#).expect("URL pattern is valid")
});

/// 页面中的一条链接
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageLink {
    pub href: String,
    #[serde(default)]
    pub text: String,
}

/// 单个页面的爬取结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlPage {
    pub url: String,
    pub success: bool,
    #[serde(default)]
    pub markdown: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub links: Vec<PageLink>,
}

impl CrawlPage {
    pub fn ok(url: impl Into<String>, markdown: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            success: true,
            markdown: markdown.into(),
            error: None,
            links: Vec::new(),
        }
    }

    pub fn failed(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            success: false,
            markdown: String::new(),
            error: Some(error.into()),
            links: Vec::new(),
        }
    }

    pub fn with_links(mut self, links: Vec<PageLink>) -> Self {
        self.links = links;
        self
    }
}

/// 爬取服务接口
#[async_trait]
pub trait Crawler: Send + Sync {
    /// 服务名称，用于日志
    fn name(&self) -> &'static str;

    /// 抓取单个页面，服务级错误返回Err，页面级失败返回 `success = false`
    async fn fetch_page(&self, url: &str) -> Result<CrawlPage>;

    /// 批量抓取，默认逐个调用 [`Crawler::fetch_page`]
    async fn batch_crawl(&self, urls: &[String]) -> Result<Vec<CrawlPage>> {
        let mut pages = Vec::with_capacity(urls.len());
        for url in urls {
            pages.push(self.fetch_page(url).await?);
        }
        Ok(pages)
    }

    /// 以 `url` 为入口按 `query` 自适应探索，返回最相关的页面
    async fn adaptive_crawl(
        &self,
        url: &str,
        query: &str,
        config: &AdaptiveConfig,
    ) -> Result<CrawlPage> {
        AdaptiveExplorer::new(self, config.clone())
            .explore(url, query)
            .await
    }
}

/// 从任意文本中提取URL，保持出现顺序并去重
pub fn extract_urls(text: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for m in URL_PATTERN.find_iter(text) {
        let url = m
            .as_str()
            .trim_end_matches(['.', ',', ';', ':', '!', '?'])
            .to_string();
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    urls
}

/// 根据配置创建爬取服务
pub fn create_crawler(config: &CrawlConfig) -> Result<Arc<dyn Crawler>> {
    let crawler: Arc<dyn Crawler> = match config.backend {
        CrawlBackend::Crawl4Ai => Arc::new(Crawl4AiCrawler::new(config)?),
        CrawlBackend::Firecrawl => Arc::new(FirecrawlCrawler::new(config)?),
    };
    tracing::info!("🕷️ 爬取服务: {}", crawler.name());
    Ok(crawler)
}
