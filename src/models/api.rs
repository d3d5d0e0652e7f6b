//! Request and response bodies of the chat backend's JSON API.

use serde::{ Serialize, Deserialize };

use super::chat::{ ChatId, FileId, NodeId, WireNode };

#[derive(Debug, Deserialize)]
pub struct TreeEnvelope {
    pub root: WireNode,
    #[serde(default)]
    pub current_node_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatTreeBody {
    pub tree: TreeEnvelope,
    #[serde(default)]
    pub current_node_id: Option<String>,
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateChatBody {
    pub chat_id: ChatId,
}

#[derive(Debug, Deserialize)]
pub struct SuccessBody {
    #[serde(default)]
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct SendMessageRequest<'a> {
    pub message: &'a str,
    pub files: &'a [FileId],
}

#[derive(Debug, Deserialize)]
pub struct SendMessageBody {
    pub node_id: NodeId,
    #[serde(default)]
    pub updated_title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EditNodeRequest<'a> {
    pub node_id: &'a NodeId,
    pub content: &'a str,
    pub files: &'a [FileId],
}

#[derive(Debug, Deserialize)]
pub struct EditNodeBody {
    pub node_id: NodeId,
    #[serde(default)]
    pub should_generate: bool,
}

#[derive(Debug, Deserialize)]
pub struct FileInfoBody {
    pub filename: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub is_image: bool,
}

#[derive(Debug, Deserialize)]
pub struct UploadBody {
    pub file_uuid: FileId,
    pub filename: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub is_image: bool,
}

#[derive(Debug, Serialize)]
pub struct ToggleToolRequest<'a> {
    pub tool_name: &'a str,
    pub enabled: bool,
}
