use thiserror::Error;

use crate::backend::BackendError;
use crate::models::chat::NodeId;
use crate::stream::StreamFailure;
use crate::tree::TreeError;

/// Failures surfaced by `ChatSessionController`.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("a response is still being generated")]
    Busy,
    #[error("message is empty")]
    EmptyMessage,
    #[error("node '{0}' cannot be continued: only the latest assistant message can")]
    InvalidContinuationTarget(NodeId),
    #[error("current node '{0}' is not in the chat tree")]
    PathResolution(NodeId),
    #[error("connection to the response stream failed: {0}")]
    Transport(String),
    #[error("response stream reported an error: {0}")]
    ApplicationStream(String),
    #[error("request failed: {0}")]
    RequestFailure(#[from] BackendError),
    #[error("no chat is selected")]
    NoActiveChat,
    #[error(transparent)]
    Tree(TreeError),
}

impl From<TreeError> for ChatError {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::PathResolution(id) => ChatError::PathResolution(id),
            other => ChatError::Tree(other),
        }
    }
}

impl From<StreamFailure> for ChatError {
    fn from(failure: StreamFailure) -> Self {
        match failure {
            StreamFailure::Transport(detail) => ChatError::Transport(detail),
            StreamFailure::Application(message) => ChatError::ApplicationStream(message),
        }
    }
}

impl ChatError {
    /// Rejections decided locally, before any request is made.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ChatError::Busy |
                ChatError::EmptyMessage |
                ChatError::InvalidContinuationTarget(_) |
                ChatError::NoActiveChat
        )
    }
}
