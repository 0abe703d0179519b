use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 包引用：名称 + 可选的版本约束
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PackageRef {
    /// 包名，例如 `pydantic` 或 `uvicorn[standard]`
    pub name: String,
    /// 版本约束，例如 `==1.10.2`、`>=2,<3`；没有约束时为空
    #[serde(default)]
    pub constraint: Option<String>,
}

impl PackageRef {
    pub fn new(name: impl Into<String>, constraint: Option<String>) -> Self {
        Self {
            name: name.into(),
            constraint,
        }
    }

    /// 从requirements中的一行解析包引用，忽略行内注释和环境标记
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.split('#').next().unwrap_or_default();
        let line = line.split(';').next().unwrap_or_default().trim();
        if line.is_empty() || line.starts_with('-') {
            return None;
        }

        match line.find(|c: char| matches!(c, '=' | '<' | '>' | '!' | '~')) {
            Some(index) => {
                let name = line[..index].trim();
                let constraint: String = line[index..].split_whitespace().collect();
                if name.is_empty() {
                    return None;
                }
                Some(Self::new(name, Some(constraint)))
            }
            None => Some(Self::new(line, None)),
        }
    }

    /// 规范化后的包名（PEP 503），用于判断重复
    pub fn normalized_name(&self) -> String {
        let base = self.name.split('[').next().unwrap_or(&self.name);
        base.to_lowercase().replace(['_', '.'], "-")
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            Some(constraint) => write!(f, "{}{}", self.name, constraint),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Query Creator 的产出：涉及的包以及检索语句
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QueryPlan {
    /// 错误涉及的包
    #[serde(default)]
    pub packages: Vec<PackageRef>,
    /// 面向下游检索的查询语句
    #[serde(default)]
    pub queries: Vec<String>,
}

impl QueryPlan {
    /// 包列表的逗号分隔形式，写入会话状态 `packages`
    pub fn package_list(&self) -> String {
        self.packages
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}
