use chrono::NaiveDateTime;
use serde::{ Deserialize, Deserializer, Serialize };
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identifier of one message node inside a chat tree.
    NodeId
);
string_id!(
    /// Identifier of a chat owned by the user.
    ChatId
);
string_id!(
    /// Identifier of an uploaded file.
    FileId
);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        f.write_str(name)
    }
}

/// A tool invocation requested by the assistant.
///
/// The backend stores calls in the OpenAI shape, where `arguments` is JSON text
/// nested under `function`. Stream events use a flat `{name, args}` shape.
/// Both decode to the same value with `arguments` parsed back into structure.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: JsonValue,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: JsonValue) -> Self {
        Self {
            name: name.into(),
            arguments: parse_arguments(arguments),
        }
    }

    /// Arguments as indented JSON, the way they are shown to the user.
    pub fn arguments_text(&self) -> String {
        serde_json::to_string_pretty(&self.arguments).unwrap_or_else(|_| self.arguments.to_string())
    }
}

fn parse_arguments(arguments: JsonValue) -> JsonValue {
    match arguments {
        JsonValue::String(text) =>
            match serde_json::from_str::<JsonValue>(&text) {
                Ok(parsed) => parsed,
                Err(_) => JsonValue::String(text),
            }
        other => other,
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireToolCall {
    Nested {
        function: WireFunction,
    },
    Flat {
        name: String,
        #[serde(default, alias = "args")]
        arguments: JsonValue,
    },
}

#[derive(Deserialize)]
struct WireFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: JsonValue,
}

impl<'de> Deserialize<'de> for ToolCall {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error> where D: Deserializer<'de> {
        let call = match WireToolCall::deserialize(deserializer)? {
            WireToolCall::Nested { function } => ToolCall::new(function.name, function.arguments),
            WireToolCall::Flat { name, arguments } => ToolCall::new(name, arguments),
        };
        Ok(call)
    }
}

/// Output of a tool: plain text, or any other JSON value (numbers, objects, ...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Structured(JsonValue),
}

impl Default for ToolResultContent {
    fn default() -> Self {
        ToolResultContent::Text(String::new())
    }
}

impl ToolResultContent {
    pub fn display_text(&self) -> String {
        match self {
            ToolResultContent::Text(text) => text.clone(),
            ToolResultContent::Structured(value) =>
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub content: ToolResultContent,
}

impl ToolResult {
    pub fn new(content: ToolResultContent) -> Self {
        Self { tool_call_id: None, content }
    }
}

/// One turn of a conversation, stored in a `ConversationTree` arena.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub role: Role,
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    pub files: Vec<FileId>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl Node {
    pub fn new(id: NodeId, role: Role, content: impl Into<String>) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            files: Vec::new(),
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn with_files(mut self, files: Vec<FileId>) -> Self {
        self.files = files;
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Nested node format the backend uses for `GET /api/chats/{id}/tree`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireNode {
    pub id: NodeId,
    pub role: Role,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tool_results: Vec<ToolResult>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub files: Vec<FileId>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub children: Vec<WireNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NodeId>,
}

impl WireNode {
    pub fn new(id: impl Into<NodeId>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            files: Vec::new(),
            children: Vec::new(),
            parent_id: None,
        }
    }

    pub fn with_child(mut self, child: WireNode) -> Self {
        self.children.push(child);
        self
    }
}

// Python's `None` reaches us as JSON null for list and text fields.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where D: Deserializer<'de>, T: Default + Deserialize<'de>
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: ChatId,
    pub title: String,
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    pub uuid: FileId,
    pub filename: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub is_image: bool,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolList {
    pub tools: Vec<String>,
    #[serde(default)]
    pub enabled: HashMap<String, bool>,
}

impl ToolList {
    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.get(name).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_call_decodes_openai_shape() {
        let call: ToolCall = serde_json
            ::from_value(
                json!({
                "id": "call_1",
                "type": "function",
                "function": { "name": "calculator", "arguments": "{\"num1\": 2, \"num2\": 3}" }
            })
            )
            .unwrap();
        assert_eq!(call.name, "calculator");
        assert_eq!(call.arguments, json!({"num1": 2, "num2": 3}));
    }

    #[test]
    fn tool_call_decodes_flat_shape_with_args_alias() {
        let call: ToolCall = serde_json
            ::from_value(json!({"name": "web_search", "args": {"query": "rust"}}))
            .unwrap();
        assert_eq!(call, ToolCall::new("web_search", json!({"query": "rust"})));
        assert!(call.arguments_text().contains("\"query\": \"rust\""));
    }

    #[test]
    fn unparsable_arguments_are_kept_as_text() {
        let call = ToolCall::new("read_url", JsonValue::String("not json {".into()));
        assert_eq!(call.arguments, JsonValue::String("not json {".into()));
    }

    #[test]
    fn tool_result_content_keeps_structure() {
        let text: ToolResult = serde_json::from_value(json!({"content": "done"})).unwrap();
        assert_eq!(text.content, ToolResultContent::Text("done".into()));

        let number: ToolResult = serde_json
            ::from_value(json!({"tool_call_id": "c1", "content": 5}))
            .unwrap();
        assert_eq!(number.content, ToolResultContent::Structured(json!(5)));
        assert_eq!(number.content.display_text(), "5");
    }

    #[test]
    fn wire_node_tolerates_null_fields() {
        let node: WireNode = serde_json
            ::from_value(
                json!({
                "id": "a",
                "role": "assistant",
                "content": null,
                "tool_calls": null,
                "tool_results": null,
                "children": [],
                "parent_id": "root"
            })
            )
            .unwrap();
        assert_eq!(node.content, "");
        assert!(node.tool_calls.is_empty());
        assert_eq!(node.parent_id, Some(NodeId::from("root")));
    }

    #[test]
    fn chat_summary_reads_naive_timestamps() {
        let summary: ChatSummary = serde_json
            ::from_value(
                json!({
                "id": "c1",
                "title": "New Chat",
                "created_at": "2024-05-01T12:30:00.123456",
                "updated_at": "2024-05-01T12:31:00"
            })
            )
            .unwrap();
        assert_eq!(summary.id, ChatId::from("c1"));
        assert!(summary.created_at.is_some());
        assert!(summary.updated_at.is_some());
    }
}
