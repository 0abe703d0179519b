//! 带工具的多轮调用，轮数用尽时整理出收尾提示

use anyhow::Result;
use rig::completion::{AssistantContent, Message, PromptError};

use super::providers::ProviderAgent;

/// 工具调用轮数用尽时留下的对话痕迹
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    /// 最后一条非空的助手文本
    pub last_text: Option<String>,
    /// 形如 `name(args)` 的工具调用记录
    pub tool_calls: Vec<String>,
}

/// 一次带工具调用的结果
#[derive(Debug, Clone, PartialEq)]
pub enum ToolRun {
    Finished(String),
    /// 在得到最终答案之前用完了轮数
    Exhausted { max_turns: usize, transcript: Transcript },
}

/// 让Agent在 `max_turns` 轮内自由调用工具
pub async fn run_tool_turns(
    agent: &ProviderAgent,
    user_prompt: &str,
    max_turns: usize,
) -> Result<ToolRun> {
    match agent.multi_turn(user_prompt, max_turns).await {
        Ok(answer) => Ok(ToolRun::Finished(answer)),
        Err(PromptError::MaxDepthError {
            max_depth,
            chat_history,
            ..
        }) => {
            tracing::warn!("   ⚠️ 工具调用达到 {} 轮上限", max_depth);
            Ok(ToolRun::Exhausted {
                max_turns: max_depth,
                transcript: Transcript::from_history(&chat_history),
            })
        }
        Err(e) => Err(anyhow::anyhow!("{}", e)),
    }
}

impl Transcript {
    pub fn from_history(history: &[Message]) -> Self {
        let mut transcript = Self::default();
        for message in history {
            let Message::Assistant { content, .. } = message else {
                continue;
            };
            let mut texts = Vec::new();
            for item in content.iter() {
                match item {
                    AssistantContent::Text(text) if !text.text.trim().is_empty() => {
                        texts.push(text.text.clone());
                    }
                    AssistantContent::ToolCall(call) => transcript.tool_calls.push(format!(
                        "{}({})",
                        call.function.name, call.function.arguments
                    )),
                    _ => {}
                }
            }
            if !texts.is_empty() {
                transcript.last_text = Some(texts.join("\n"));
            }
        }
        transcript
    }

    /// 交给无工具Agent的收尾提示：只根据已有线索给出最终答案
    pub fn wrap_up_prompt(&self, user_prompt: &str) -> String {
        let mut prompt = format!("# Request\n{}\n\n", user_prompt);
        if !self.tool_calls.is_empty() {
            prompt.push_str("# Tools already called\n");
            for call in &self.tool_calls {
                prompt.push_str(&format!("- {}\n", call));
            }
            prompt.push('\n');
        }
        if let Some(text) = &self.last_text {
            prompt.push_str("# Your notes so far\n");
            prompt.push_str(text);
            prompt.push_str("\n\n");
        }
        prompt.push_str(
            "You ran out of tool turns. Do not call any more tools. Answer the request now \
             in the output format it asks for, using only what is above. If something is \
             missing, say so instead of guessing package versions.\n",
        );
        prompt
    }

    /// 收尾也失败时直接交付的部分答案
    pub fn partial_answer(&self, max_turns: usize) -> String {
        format!(
            "{}\n\n[stopped after {} tool turns]",
            self.last_text
                .as_deref()
                .unwrap_or("No final answer was produced before the tool turn limit."),
            max_turns
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_history_keeps_last_assistant_text() {
        let history = vec![
            Message::user("Find the pydantic migration guide"),
            Message::assistant("Searching the docs first."),
            Message::user("tool result"),
            Message::assistant("BaseSettings moved to pydantic-settings."),
        ];
        let transcript = Transcript::from_history(&history);
        assert_eq!(
            transcript.last_text.as_deref(),
            Some("BaseSettings moved to pydantic-settings.")
        );
        assert!(transcript.tool_calls.is_empty());
    }

    #[test]
    fn test_wrap_up_prompt_lists_tool_calls() {
        let transcript = Transcript {
            last_text: Some("pydantic 2 drops BaseSettings".to_string()),
            tool_calls: vec![r#"web_search({"query":"pydantic BaseSettings"})"#.to_string()],
        };
        let prompt = transcript.wrap_up_prompt("Return the top URLs as JSON");
        assert!(prompt.starts_with("# Request\nReturn the top URLs as JSON"));
        assert!(prompt.contains("- web_search("));
        assert!(prompt.contains("# Your notes so far\npydantic 2 drops BaseSettings"));
        assert!(prompt.contains("Do not call any more tools"));
    }

    #[test]
    fn test_partial_answer_without_text() {
        let answer = Transcript::default().partial_answer(8);
        assert!(answer.starts_with("No final answer"));
        assert!(answer.ends_with("[stopped after 8 tool turns]"));
    }
}
