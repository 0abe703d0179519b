use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{CrawlPage, Crawler, PageLink};
use crate::config::CrawlConfig;
use crate::error::ResolverError;

const SERVICE: &str = "crawl4ai";

/// Crawl4AI REST 服务客户端
pub struct Crawl4AiCrawler {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrawlResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    results: Vec<CrawlResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrawlResult {
    url: String,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    markdown: Option<MarkdownField>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    links: Option<LinkGroups>,
}

/// 新版本返回对象，旧版本直接返回字符串
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MarkdownField {
    Plain(String),
    Generated {
        #[serde(default)]
        raw_markdown: String,
        #[serde(default)]
        fit_markdown: Option<String>,
    },
}

impl MarkdownField {
    fn into_text(self) -> String {
        match self {
            MarkdownField::Plain(text) => text,
            MarkdownField::Generated {
                raw_markdown,
                fit_markdown,
            } => fit_markdown
                .filter(|fit| !fit.trim().is_empty())
                .unwrap_or(raw_markdown),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct LinkGroups {
    #[serde(default)]
    internal: Vec<RawLink>,
    #[serde(default)]
    external: Vec<RawLink>,
}

#[derive(Debug, Deserialize)]
struct RawLink {
    #[serde(default)]
    href: String,
    #[serde(default)]
    text: String,
}

impl From<CrawlResult> for CrawlPage {
    fn from(result: CrawlResult) -> Self {
        let links = result
            .links
            .map(|groups| {
                groups
                    .internal
                    .into_iter()
                    .chain(groups.external)
                    .filter(|link| !link.href.is_empty())
                    .map(|link| PageLink {
                        href: link.href,
                        text: link.text,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let markdown = result
            .markdown
            .map(MarkdownField::into_text)
            .unwrap_or_default();

        CrawlPage {
            url: result.url,
            success: result.success,
            markdown,
            error: if result.success {
                None
            } else {
                Some(
                    result
                        .error_message
                        .unwrap_or_else(|| "unknown crawl error".to_string()),
                )
            },
            links,
        }
    }
}

impl Crawl4AiCrawler {
    pub fn new(config: &CrawlConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            base_url: config.crawl4ai_base_url.trim_end_matches('/').to_string(),
            api_token: config.crawl4ai_api_token.clone(),
        })
    }

    async fn crawl(&self, urls: &[String]) -> Result<Vec<CrawlPage>> {
        let body = json!({
            "urls": urls,
            "browser_config": {"type": "BrowserConfig", "params": {"headless": true}},
            "crawler_config": {
                "type": "CrawlerRunConfig",
                "params": {"cache_mode": "bypass", "word_count_threshold": 10}
            },
        });

        let mut request = self
            .client
            .post(format!("{}/crawl", self.base_url))
            .json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| ResolverError::CrawlService {
            service: SERVICE,
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ResolverError::CrawlService {
                service: SERVICE,
                message: format!("HTTP {}: {}", status, text),
            }
            .into());
        }

        let parsed: CrawlResponse =
            response
                .json()
                .await
                .map_err(|e| ResolverError::CrawlService {
                    service: SERVICE,
                    message: format!("invalid response: {}", e),
                })?;

        if !parsed.success && parsed.results.is_empty() {
            return Err(ResolverError::CrawlService {
                service: SERVICE,
                message: parsed
                    .error
                    .unwrap_or_else(|| "crawl reported failure".to_string()),
            }
            .into());
        }

        let mut pages: Vec<CrawlPage> = parsed.results.into_iter().map(CrawlPage::from).collect();
        // 服务端漏掉的URL视为失败页面
        for url in urls {
            if !pages.iter().any(|page| &page.url == url) {
                pages.push(CrawlPage::failed(url.clone(), "missing from crawl response"));
            }
        }
        Ok(pages)
    }
}

#[async_trait]
impl Crawler for Crawl4AiCrawler {
    fn name(&self) -> &'static str {
        SERVICE
    }

    async fn fetch_page(&self, url: &str) -> Result<CrawlPage> {
        let pages = self.crawl(&[url.to_string()]).await?;
        Ok(pages
            .into_iter()
            .next()
            .unwrap_or_else(|| CrawlPage::failed(url, "empty crawl response")))
    }

    async fn batch_crawl(&self, urls: &[String]) -> Result<Vec<CrawlPage>> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }
        tracing::info!("🕷️ Crawl4AI 批量爬取 {} 个URL", urls.len());
        self.crawl(urls).await
    }
}
