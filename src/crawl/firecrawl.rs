use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{CrawlPage, Crawler, PageLink};
use crate::config::CrawlConfig;
use crate::error::ResolverError;

const SERVICE: &str = "firecrawl";

/// Firecrawl scrape API 客户端，逐页抓取
pub struct FirecrawlCrawler {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<ScrapeData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScrapeData {
    #[serde(default)]
    markdown: String,
    #[serde(default)]
    links: Vec<String>,
}

impl FirecrawlCrawler {
    pub fn new(config: &CrawlConfig) -> Result<Self> {
        if config.firecrawl_api_key.is_empty() {
            return Err(ResolverError::CrawlService {
                service: SERVICE,
                message: "FIRECRAWL_API_KEY is not set".to_string(),
            }
            .into());
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            base_url: config.firecrawl_base_url.trim_end_matches('/').to_string(),
            api_key: config.firecrawl_api_key.clone(),
        })
    }
}

#[async_trait]
impl Crawler for FirecrawlCrawler {
    fn name(&self) -> &'static str {
        SERVICE
    }

    async fn fetch_page(&self, url: &str) -> Result<CrawlPage> {
        let response = self
            .client
            .post(format!("{}/v1/scrape", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({"url": url, "formats": ["markdown", "links"]}))
            .send()
            .await
            .map_err(|e| ResolverError::CrawlService {
                service: SERVICE,
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let text = response.text().await.unwrap_or_default();
            return Err(ResolverError::CrawlService {
                service: SERVICE,
                message: format!("HTTP {}: {}", status, text),
            }
            .into());
        }
        if !status.is_success() {
            // 单页失败不影响其它页面
            let text = response.text().await.unwrap_or_default();
            return Ok(CrawlPage::failed(url, format!("HTTP {}: {}", status, text)));
        }

        let parsed: ScrapeResponse =
            response
                .json()
                .await
                .map_err(|e| ResolverError::CrawlService {
                    service: SERVICE,
                    message: format!("invalid response: {}", e),
                })?;

        match (parsed.success, parsed.data) {
            (true, Some(data)) => {
                let links = data
                    .links
                    .into_iter()
                    .map(|href| PageLink {
                        href,
                        text: String::new(),
                    })
                    .collect();
                Ok(CrawlPage::ok(url, data.markdown).with_links(links))
            }
            (_, _) => Ok(CrawlPage::failed(
                url,
                parsed
                    .error
                    .unwrap_or_else(|| "scrape reported failure".to_string()),
            )),
        }
    }
}
