use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// 流水线的四个阶段，按执行顺序排列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Query,
    Research,
    Crawl,
    Fix,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Query, Stage::Research, Stage::Crawl, Stage::Fix];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Query => "query",
            Stage::Research => "research",
            Stage::Crawl => "crawl",
            Stage::Fix => "fix",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 执行过程中对外推送的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    StageStarted { stage: Stage },
    StageCompleted { stage: Stage, elapsed_ms: u64 },
    AgentMessage { agent: String, content: String },
    Warning { message: String },
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::StageStarted { .. } => "stage_started",
            PipelineEvent::StageCompleted { .. } => "stage_completed",
            PipelineEvent::AgentMessage { .. } => "agent_message",
            PipelineEvent::Warning { .. } => "warning",
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<PipelineEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<PipelineEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = PipelineEvent::StageCompleted {
            stage: Stage::Crawl,
            elapsed_ms: 42,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stage_completed");
        assert_eq!(json["stage"], "crawl");
        assert_eq!(event.name(), "stage_completed");
    }

    #[test]
    fn test_stage_order() {
        let names: Vec<&str> = Stage::ALL.iter().map(Stage::as_str).collect();
        assert_eq!(names, vec!["query", "research", "crawl", "fix"]);
    }
}
