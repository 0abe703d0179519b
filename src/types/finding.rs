use serde::{Deserialize, Serialize};

/// 爬取阶段的产出：来源URL + 提取的文本片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub url: String,
    pub snippet: String,
}

impl Finding {
    /// 片段的最大长度（字符数），避免单个页面挤占整个prompt
    pub const MAX_SNIPPET_CHARS: usize = 6000;

    pub fn new(url: impl Into<String>, content: &str) -> Self {
        let snippet = if content.chars().count() > Self::MAX_SNIPPET_CHARS {
            let truncated: String = content.chars().take(Self::MAX_SNIPPET_CHARS).collect();
            format!("{}...(truncated)", truncated)
        } else {
            content.to_string()
        };
        Self {
            url: url.into(),
            snippet,
        }
    }
}
