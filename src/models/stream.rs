use serde::{ Serialize, Deserialize };
use serde_json::Value as JsonValue;

use super::chat::{ NodeId, ToolResultContent };

/// One server-push event of a response stream.
///
/// Each `data:` line of the event stream carries one of these as JSON,
/// discriminated by its `type` field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Status {
        #[serde(default, alias = "message")]
        content: String,
    },
    Timings {
        #[serde(default)]
        timings: Timings,
    },
    Content {
        #[serde(default)]
        content: String,
    },
    ReasoningContent {
        #[serde(default)]
        content: String,
    },
    ToolCall {
        name: String,
        #[serde(default, alias = "arguments")]
        args: JsonValue,
    },
    ToolResult {
        #[serde(default)]
        tool_call_id: Option<String>,
        #[serde(default)]
        result: ToolResultContent,
    },
    Finished {
        node_id: NodeId,
        #[serde(default)]
        final_content: Option<String>,
    },
    Error {
        #[serde(alias = "content")]
        message: String,
    },
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Status { .. } => "status",
            StreamEvent::Timings { .. } => "timings",
            StreamEvent::Content { .. } => "content",
            StreamEvent::ReasoningContent { .. } => "reasoning_content",
            StreamEvent::ToolCall { .. } => "tool_call",
            StreamEvent::ToolResult { .. } => "tool_result",
            StreamEvent::Finished { .. } => "finished",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Unknown => "unknown",
        }
    }

    pub fn content(fragment: impl Into<String>) -> Self {
        StreamEvent::Content { content: fragment.into() }
    }

    pub fn finished(node_id: impl Into<NodeId>) -> Self {
        StreamEvent::Finished { node_id: node_id.into(), final_content: None }
    }
}

/// Generation metrics reported by the model server. Every report is a full snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Timings {
    #[serde(default)]
    pub prompt_n: Option<u64>,
    #[serde(default)]
    pub prompt_ms: Option<f64>,
    #[serde(default)]
    pub prompt_per_token_ms: Option<f64>,
    #[serde(default)]
    pub prompt_per_second: Option<f64>,
    #[serde(default)]
    pub predicted_n: Option<u64>,
    #[serde(default)]
    pub predicted_ms: Option<f64>,
    #[serde(default)]
    pub predicted_per_token_ms: Option<f64>,
    #[serde(default)]
    pub predicted_per_second: Option<f64>,
}

impl Timings {
    pub fn is_empty(&self) -> bool {
        *self == Timings::default()
    }

    pub fn throughput_label(&self) -> String {
        format!("{:.2} tok/s", self.predicted_per_second.unwrap_or(0.0))
    }

    pub fn summary(&self) -> String {
        let count = |v: Option<u64>| v.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string());
        let millis = |v: Option<f64>| format!("{:.2}", v.unwrap_or(0.0));
        [
            format!("Prompt Tokens: {}", count(self.prompt_n)),
            format!("Prompt Time: {} ms", millis(self.prompt_ms)),
            format!("Prompt per Token: {} ms", millis(self.prompt_per_token_ms)),
            format!("Prompt per Second: {} tok/s", millis(self.prompt_per_second)),
            format!("Predicted Tokens: {}", count(self.predicted_n)),
            format!("Predicted Time: {} ms", millis(self.predicted_ms)),
            format!("Predicted per Token: {} ms", millis(self.predicted_per_token_ms)),
            format!("Predicted per Second: {} tok/s", millis(self.predicted_per_second)),
        ].join("\n")
    }
}
