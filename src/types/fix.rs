use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use super::PackageRef;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```([A-Za-z0-9_.+-]*)[^\n]*\n(.*?)```").expect("fenced block pattern")
});

/// 认为是requirements内容的代码块语言标记
const REQUIREMENTS_FENCES: &[&str] = &["requirements", "requirements.txt", "txt", "text", "pip"];

/// Code Surgeon 提出的候选修复方案
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateFix {
    /// 按原顺序排列的包引用
    pub requirements: Vec<PackageRef>,
    /// requirements.txt 原文
    pub raw: String,
    /// 修复说明（去掉requirements代码块之后的模型输出）
    pub explanation: String,
}

impl CandidateFix {
    /// 从模型输出中解析候选方案，找不到requirements代码块时 raw 为空
    pub fn from_model_output(text: &str) -> Self {
        let mut tagged = None;
        let mut untagged = None;
        for captures in FENCED_BLOCK.captures_iter(text) {
            let lang = captures.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
            let whole = captures.get(0).map(|m| m.as_str()).unwrap_or_default();
            let body = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
            if REQUIREMENTS_FENCES.contains(&lang.as_str()) {
                tagged = Some((whole, body));
                break;
            }
            if lang.is_empty() && untagged.is_none() {
                untagged = Some((whole, body));
            }
        }

        let Some((whole, body)) = tagged.or(untagged) else {
            return Self {
                explanation: text.trim().to_string(),
                ..Default::default()
            };
        };

        let raw = body.trim().to_string();
        let requirements = raw.lines().filter_map(PackageRef::parse).collect();
        let explanation = text.replacen(whole, "", 1).trim().to_string();

        Self {
            requirements,
            raw,
            explanation,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.raw.trim().is_empty()
    }
}

/// Verifier 的结论
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VerificationVerdict {
    /// 方案是否可以直接交付
    pub passed: bool,
    /// 发现的问题，passed 为 true 时为空
    #[serde(default)]
    pub issues: Vec<String>,
}

/// 修复循环的终止状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    Verified,
    CapExceeded,
}

impl FixStatus {
    pub fn is_verified(&self) -> bool {
        matches!(self, FixStatus::Verified)
    }
}
