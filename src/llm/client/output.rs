//! 从模型的自由文本中提取结构化输出

use regex::Regex;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use std::sync::LazyLock;

use crate::error::ResolverError;

static JSON_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?[^\n]*\n(.*?)```").expect("json fence pattern")
});

/// 解析模型输出中的JSON
///
/// 依次尝试：整段文本、```json 代码块、文本中第一个完整的对象或数组。
pub fn parse_json_output<T: DeserializeOwned>(text: &str) -> Result<T, ResolverError> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<T>(trimmed) {
        return Ok(value);
    }

    for captures in JSON_FENCE.captures_iter(trimmed) {
        if let Some(body) = captures.get(1) {
            if let Ok(value) = serde_json::from_str::<T>(body.as_str().trim()) {
                return Ok(value);
            }
        }
    }

    let mut last_error = String::from("no JSON value found");
    for (start, _) in trimmed.match_indices(['{', '[']) {
        if let Some(candidate) = balanced_span(&trimmed[start..]) {
            match serde_json::from_str::<T>(candidate) {
                Ok(value) => return Ok(value),
                Err(e) => last_error = e.to_string(),
            }
        }
    }

    Err(ResolverError::InvalidModelOutput {
        expected: short_type_name::<T>(),
        reason: last_error,
    })
}

/// 从开头的括号起截取到与之匹配的闭合括号，跳过字符串内的括号
fn balanced_span(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (index, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..index + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

/// 生成附加在提示词末尾的输出格式说明
pub fn schema_instruction<T: JsonSchema>() -> String {
    let schema = schemars::schema_for!(T);
    let rendered = serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string());
    format!(
        "Respond with a single JSON value that conforms to this JSON schema. \
         You may wrap it in a ```json code block; do not add any other JSON.\n```json\n{}\n```",
        rendered
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{QueryPlan, VerificationVerdict};
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct TopUrls {
        top_urls: Vec<String>,
    }

    #[test]
    fn test_parse_plain_json() {
        let verdict: VerificationVerdict =
            parse_json_output(r#"{"passed": true, "issues": []}"#).unwrap();
        assert!(verdict.passed);
    }

    #[test]
    fn test_parse_fenced_json_after_heading() {
        let text = "**Model: research**\n## Official Docs Results\n```json\n{\"top_urls\": [\"https://a\", \"https://b\"]}\n```";
        let parsed: TopUrls = parse_json_output(text).unwrap();
        assert_eq!(parsed.top_urls, vec!["https://a", "https://b"]);
    }

    #[test]
    fn test_parse_embedded_object_with_braces_in_strings() {
        let text = r#"## Search Queries
Here is the plan: {"packages": [{"name": "numpy", "constraint": "<2"}], "queries": ["numpy {float} removed"]} done."#;
        let plan: QueryPlan = parse_json_output(text).unwrap();
        assert_eq!(plan.packages[0].name, "numpy");
        assert_eq!(plan.queries, vec!["numpy {float} removed"]);
    }

    #[test]
    fn test_parse_bare_array() {
        let queries: Vec<String> =
            parse_json_output("Queries:\n[\"a\", \"b\"]").unwrap();
        assert_eq!(queries, vec!["a", "b"]);
    }

    #[test]
    fn test_parse_failure_names_type() {
        let err = parse_json_output::<VerificationVerdict>("looks good to me").unwrap_err();
        assert!(err.to_string().contains("VerificationVerdict"));
    }

    #[test]
    fn test_schema_instruction_mentions_fields() {
        let instruction = schema_instruction::<VerificationVerdict>();
        assert!(instruction.contains("\"passed\""));
        assert!(instruction.contains("\"issues\""));
    }
}
