use anyhow::Result;
use std::collections::{HashSet, VecDeque};

use super::{CrawlPage, Crawler, PageLink};
use crate::config::CrawlConfig;

/// 自适应爬取参数
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveConfig {
    pub max_pages: usize,
    pub confidence_threshold: f64,
    pub top_k_links: usize,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            max_pages: 3,
            confidence_threshold: 0.7,
            top_k_links: 2,
        }
    }
}

impl From<&CrawlConfig> for AdaptiveConfig {
    fn from(config: &CrawlConfig) -> Self {
        Self {
            max_pages: config.adaptive_max_pages.max(1),
            confidence_threshold: config.adaptive_confidence_threshold,
            top_k_links: config.adaptive_top_k_links,
        }
    }
}

/// 从入口页面出发，沿最相关的链接逐页探索
///
/// 每个页面按查询词覆盖率打分；达到置信度阈值即停止，
/// 否则跟进得分最高的 `top_k_links` 个链接，直到 `max_pages` 用尽。
pub struct AdaptiveExplorer<'a, C: Crawler + ?Sized> {
    crawler: &'a C,
    config: AdaptiveConfig,
}

impl<'a, C: Crawler + ?Sized> AdaptiveExplorer<'a, C> {
    pub fn new(crawler: &'a C, config: AdaptiveConfig) -> Self {
        Self { crawler, config }
    }

    pub async fn explore(&self, start_url: &str, query: &str) -> Result<CrawlPage> {
        let terms = query_terms(query);
        let mut frontier: VecDeque<String> = VecDeque::from([start_url.to_string()]);
        let mut visited: HashSet<String> = HashSet::new();
        let mut best: Option<(f64, CrawlPage)> = None;
        let mut first_failure: Option<CrawlPage> = None;

        while let Some(url) = frontier.pop_front() {
            if visited.len() >= self.config.max_pages {
                break;
            }
            if !visited.insert(url.clone()) {
                continue;
            }

            let page = self.crawler.fetch_page(&url).await?;
            if !page.success {
                tracing::debug!("⚠️ 自适应爬取页面失败: {}", url);
                first_failure.get_or_insert(page);
                continue;
            }

            let confidence = coverage(&terms, &page.markdown);
            tracing::debug!("🧭 {} 置信度 {:.2}", url, confidence);

            for link in rank_links(&terms, &page.links, self.config.top_k_links) {
                if !visited.contains(&link) && !frontier.contains(&link) {
                    frontier.push_back(link);
                }
            }

            let is_better = best
                .as_ref()
                .is_none_or(|(best_score, _)| confidence > *best_score);
            if is_better {
                best = Some((confidence, page));
            }

            if confidence >= self.config.confidence_threshold {
                tracing::debug!("✅ 置信度达到阈值，停止探索");
                break;
            }
        }

        match (best, first_failure) {
            (Some((_, page)), _) => Ok(page),
            (None, Some(failure)) => Ok(failure),
            (None, None) => Ok(CrawlPage::failed(start_url, "no page could be crawled")),
        }
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

fn query_terms(query: &str) -> HashSet<String> {
    tokenize(query)
}

/// 查询词在文本中的覆盖率，取值 0..=1
pub(crate) fn coverage(terms: &HashSet<String>, text: &str) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let words = tokenize(text);
    let matched = terms
        .iter()
        .filter(|term| words.iter().any(|w| w.starts_with(term.as_str())))
        .count();
    matched as f64 / terms.len() as f64
}

/// 按链接地址与文字中的查询词重合度选出前 `k` 个链接
fn rank_links(terms: &HashSet<String>, links: &[PageLink], k: usize) -> Vec<String> {
    let mut scored: Vec<(usize, &PageLink)> = links
        .iter()
        .filter(|link| link.href.starts_with("http"))
        .map(|link| {
            let words = tokenize(&format!("{} {}", link.href, link.text));
            let score = terms.iter().filter(|t| words.contains(*t)).count();
            (score, link)
        })
        .filter(|(score, _)| *score > 0)
        .collect();
    // 稳定排序保留页面内原有顺序
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored
        .into_iter()
        .take(k)
        .map(|(_, link)| link.href.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// 预置页面的爬取服务，记录访问顺序
    struct SiteMap {
        pages: HashMap<String, CrawlPage>,
        visited: Mutex<Vec<String>>,
    }

    impl SiteMap {
        fn new(pages: Vec<CrawlPage>) -> Self {
            Self {
                pages: pages.into_iter().map(|p| (p.url.clone(), p)).collect(),
                visited: Mutex::new(Vec::new()),
            }
        }

        fn visited(&self) -> Vec<String> {
            self.visited.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Crawler for SiteMap {
        fn name(&self) -> &'static str {
            "sitemap"
        }

        async fn fetch_page(&self, url: &str) -> Result<CrawlPage> {
            self.visited.lock().unwrap().push(url.to_string());
            Ok(self
                .pages
                .get(url)
                .cloned()
                .unwrap_or_else(|| CrawlPage::failed(url, "404")))
        }
    }

    fn link(href: &str, text: &str) -> PageLink {
        PageLink {
            href: href.to_string(),
            text: text.to_string(),
        }
    }

    const QUERY: &str = "dependency conflicts version requirements";

    #[tokio::test]
    async fn test_stops_when_start_page_is_confident() {
        let site = SiteMap::new(vec![
            CrawlPage::ok(
                "https://a/start",
                "This page lists version requirements and dependency conflicts.",
            )
            .with_links(vec![link("https://a/other", "version notes")]),
        ]);

        let page = AdaptiveExplorer::new(&site, AdaptiveConfig::default())
            .explore("https://a/start", QUERY)
            .await
            .unwrap();
        assert_eq!(page.url, "https://a/start");
        assert_eq!(site.visited(), vec!["https://a/start"]);
    }

    #[tokio::test]
    async fn test_follows_relevant_links_and_returns_best_page() {
        let site = SiteMap::new(vec![
            CrawlPage::ok("https://a/start", "Welcome to the project home page.").with_links(vec![
                link("https://a/blog", "Blog"),
                link("https://a/install", "Installation requirements"),
                link("https://a/compat", "Version compatibility"),
            ]),
            CrawlPage::ok("https://a/install", "Installation requirements: python 3.9"),
            CrawlPage::ok(
                "https://a/compat",
                "Version requirements matrix; dependency conflicts explained.",
            ),
        ]);

        let page = AdaptiveExplorer::new(&site, AdaptiveConfig::default())
            .explore("https://a/start", QUERY)
            .await
            .unwrap();

        assert_eq!(page.url, "https://a/compat");
        assert!(!site.visited().contains(&"https://a/blog".to_string()));
        assert!(site.visited().len() <= 3);
    }

    #[tokio::test]
    async fn test_respects_max_pages() {
        let site = SiteMap::new(vec![
            CrawlPage::ok("https://a/1", "nothing").with_links(vec![link("https://a/2", "version")]),
            CrawlPage::ok("https://a/2", "nothing").with_links(vec![link("https://a/3", "version")]),
            CrawlPage::ok("https://a/3", "nothing").with_links(vec![link("https://a/4", "version")]),
        ]);
        let config = AdaptiveConfig {
            max_pages: 2,
            ..AdaptiveConfig::default()
        };

        AdaptiveExplorer::new(&site, config)
            .explore("https://a/1", QUERY)
            .await
            .unwrap();
        assert_eq!(site.visited(), vec!["https://a/1", "https://a/2"]);
    }

    #[tokio::test]
    async fn test_failed_start_page_is_returned() {
        let site = SiteMap::new(vec![]);
        let page = AdaptiveExplorer::new(&site, AdaptiveConfig::default())
            .explore("https://missing", QUERY)
            .await
            .unwrap();
        assert!(!page.success);
        assert_eq!(page.url, "https://missing");
    }

    #[test]
    fn test_coverage() {
        let terms = query_terms(QUERY);
        assert_eq!(coverage(&terms, ""), 0.0);
        assert_eq!(coverage(&terms, "Dependency conflicts, version requirements"), 1.0);
        assert!((coverage(&terms, "versions only") - 0.25).abs() < 1e-9);
    }
}
