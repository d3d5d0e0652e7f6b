pub mod http;

use async_trait::async_trait;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use thiserror::Error;

use crate::models::chat::{ ChatId, ChatSummary, FileId, FileRef, NodeId, ToolList, WireNode };
use crate::models::stream::StreamEvent;

pub use self::http::HttpBackend;

/// Server-push events of one response stream, in the order the backend sent them.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, BackendError>> + Send>>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status {
        status: u16,
        body: String,
    },
    #[error("backend rejected the request: {0}")]
    Rejected(String),
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("base URL '{0}' cannot carry a path")]
    InvalidBaseUrl(String),
    #[error("stream transport error: {0}")]
    Transport(String),
}

/// Tree of one chat as the backend reports it.
#[derive(Debug, Clone)]
pub struct ChatTreeResponse {
    pub title: String,
    pub current_node_id: Option<NodeId>,
    pub root: WireNode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendReceipt {
    pub node_id: NodeId,
    pub updated_title: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditReceipt {
    pub node_id: NodeId,
    pub should_generate: bool,
}

/// The chat service the client talks to. Generation, tool execution, file
/// storage and persistence all live behind it.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn list_chats(&self) -> Result<Vec<ChatSummary>, BackendError>;

    async fn create_chat(&self) -> Result<ChatId, BackendError>;

    async fn delete_chat(&self, chat_id: &ChatId) -> Result<bool, BackendError>;

    async fn get_chat_tree(&self, chat_id: &ChatId) -> Result<ChatTreeResponse, BackendError>;

    async fn send_message(
        &self,
        chat_id: &ChatId,
        text: &str,
        files: &[FileId]
    ) -> Result<SendReceipt, BackendError>;

    /// Prepares generation on an assistant node; the tokens arrive through `open_stream`.
    async fn continue_node(&self, chat_id: &ChatId, node_id: &NodeId) -> Result<bool, BackendError>;

    async fn edit_node(
        &self,
        chat_id: &ChatId,
        node_id: &NodeId,
        text: &str,
        files: &[FileId]
    ) -> Result<EditReceipt, BackendError>;

    async fn open_stream(&self, chat_id: &ChatId, node_id: &NodeId) -> Result<EventStream, BackendError>;

    async fn list_files(&self) -> Result<HashMap<FileId, FileRef>, BackendError>;

    async fn upload_file(&self, bytes: Vec<u8>, filename: &str) -> Result<FileRef, BackendError>;

    async fn list_tools(&self) -> Result<ToolList, BackendError>;

    async fn set_tool_enabled(&self, name: &str, enabled: bool) -> Result<bool, BackendError>;
}

/// Turns an empty `current_node_id` into "uninitialized".
pub(crate) fn non_empty_node_id(raw: Option<String>) -> Option<NodeId> {
    raw.filter(|id| !id.trim().is_empty()).map(NodeId::from)
}
