//! requirements.txt 校验工具

use regex::Regex;
use rig::tool::Tool;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::types::PackageRef;

static PINNED_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.\-]+(\[[A-Za-z0-9_,.\-]+\])?\s*[=<>!~]+\s*[0-9A-Za-z.*]+")
        .expect("pinned requirement pattern")
});

static BARE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.\-]+(\[[A-Za-z0-9_,.\-]+\])?$").expect("bare requirement pattern")
});

/// 校验成功时工具返回的固定文本
pub const VALIDATION_SUCCESS: &str = "SUCCESS";

/// 确定性校验的结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequirementsCheck {
    pub issues: Vec<String>,
    pub empty: bool,
}

impl RequirementsCheck {
    pub fn is_valid(&self) -> bool {
        !self.empty && self.issues.is_empty()
    }

    /// 工具返回给模型的文本
    pub fn summary(&self) -> String {
        if self.empty {
            "Error: Empty requirements content.".to_string()
        } else if self.issues.is_empty() {
            VALIDATION_SUCCESS.to_string()
        } else {
            format!("Validation Failed: {}", self.issues.join("; "))
        }
    }

    /// 以问题列表形式给出，空内容也算一个问题
    pub fn into_issues(self) -> Vec<String> {
        if self.empty {
            vec!["Error: Empty requirements content.".to_string()]
        } else {
            self.issues
        }
    }
}

/// 逐行检查语法，并找出同一个包的重复声明
pub fn check_requirements(content: &str) -> RequirementsCheck {
    if content.trim().is_empty() {
        return RequirementsCheck {
            issues: Vec::new(),
            empty: true,
        };
    }

    let mut issues = Vec::new();
    let mut seen: HashMap<String, String> = HashMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        // 去掉行内注释
        let line = line.split(" #").next().unwrap_or(line).trim();

        if !PINNED_LINE.is_match(line) && !BARE_LINE.is_match(line) {
            issues.push(format!("Invalid syntax: {}", line));
            continue;
        }

        if let Some(package) = PackageRef::parse(line) {
            let key = package.normalized_name();
            match seen.get(&key) {
                Some(previous) => issues.push(format!(
                    "Conflicting entries for {}: {} vs {}",
                    package.name, previous, line
                )),
                None => {
                    seen.insert(key, line.to_string());
                }
            }
        }
    }

    RequirementsCheck {
        issues,
        empty: false,
    }
}

/// 兼容旧接口的文本形式：`SUCCESS` / `Validation Failed: ...` / `Error: ...`
pub fn validate_requirements(content: &str) -> String {
    check_requirements(content).summary()
}

/// 暴露给模型的校验工具
#[derive(Debug, Clone, Default)]
pub struct AgentToolValidateRequirements;

#[derive(Debug, Deserialize)]
pub struct ValidateRequirementsArgs {
    pub requirements_content: String,
}

#[derive(Debug, thiserror::Error)]
#[error("requirements validation tool error")]
pub struct ValidateRequirementsError;

impl Tool for AgentToolValidateRequirements {
    const NAME: &'static str = "validate_requirements";

    type Error = ValidateRequirementsError;
    type Args = ValidateRequirementsArgs;
    type Output = String;

    async fn definition(&self, _prompt: String) -> rig::completion::ToolDefinition {
        rig::completion::ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Validates requirements.txt content. Checks the syntax of every line and flags duplicated packages. Returns SUCCESS or the list of problems.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "requirements_content": {
                        "type": "string",
                        "description": "The full content of the requirements.txt file."
                    }
                },
                "required": ["requirements_content"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        tracing::debug!("   🔧 tool called...validate_requirements");
        let result = validate_requirements(&args.requirements_content);
        if result == VALIDATION_SUCCESS {
            tracing::info!("✅ Requirements validation passed.");
        }
        Ok(result)
    }
}
