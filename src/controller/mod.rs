pub mod attachments;

use log::{ debug, error, info, warn };
use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::{ Backend, BackendError };
use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::models::chat::{ ChatId, ChatSummary, FileId, FileRef, Node, NodeId, Role, ToolList };
use crate::status::StatusSink;
use crate::stream::render::RenderState;
use crate::stream::{ StreamMode, StreamSession, StreamState, StreamUpdate };
use crate::tree::{ Chat, ConversationTree, TreeError };

pub use self::attachments::PendingAttachments;

/// Drives one user's chat session: the open chat and its tree, the single
/// response stream, staged attachments, and the backend's file and tool lists.
///
/// At most one stream is open at a time. `send`, `continue_last` and `edit`
/// fail with `ChatError::Busy` while it is opening or streaming, and change
/// nothing when they do. Navigation (`switch_chat`, `delete_chat`,
/// `create_chat`) cancels it instead.
pub struct ChatSessionController {
    backend: Arc<dyn Backend>,
    status: Arc<dyn StatusSink>,
    max_coalesced_events: usize,
    refetch_after_edit: bool,
    chats: Vec<ChatSummary>,
    chat: Option<Chat>,
    session: Option<StreamSession>,
    attachments: PendingAttachments,
    files: HashMap<FileId, FileRef>,
    tools: ToolList,
}

impl ChatSessionController {
    pub fn new(backend: Arc<dyn Backend>, status: Arc<dyn StatusSink>, config: &ClientConfig) -> Self {
        Self {
            backend,
            status,
            max_coalesced_events: config.max_coalesced_events,
            refetch_after_edit: config.refetch_after_edit,
            chats: Vec::new(),
            chat: None,
            session: None,
            attachments: PendingAttachments::new(),
            files: HashMap::new(),
            tools: ToolList::default(),
        }
    }

    pub fn chats(&self) -> &[ChatSummary] {
        &self.chats
    }

    pub fn current_chat(&self) -> Option<&Chat> {
        self.chat.as_ref()
    }

    pub fn current_chat_id(&self) -> Option<&ChatId> {
        self.chat.as_ref().map(|chat| &chat.id)
    }

    pub fn tree(&self) -> Option<&ConversationTree> {
        self.chat.as_ref().map(|chat| &chat.tree)
    }

    pub fn session(&self) -> Option<&StreamSession> {
        self.session.as_ref()
    }

    pub fn render(&self) -> Option<&RenderState> {
        self.session.as_ref().map(StreamSession::render)
    }

    pub fn stream_state(&self) -> StreamState {
        self.session
            .as_ref()
            .map(StreamSession::state)
            .unwrap_or(StreamState::Idle)
    }

    pub fn is_busy(&self) -> bool {
        self.stream_state().is_active()
    }

    pub fn attachments(&self) -> &PendingAttachments {
        &self.attachments
    }

    pub fn files(&self) -> &HashMap<FileId, FileRef> {
        &self.files
    }

    pub fn tools(&self) -> &ToolList {
        &self.tools
    }

    pub fn ensure_idle(&self) -> Result<(), ChatError> {
        if self.is_busy() {
            return Err(ChatError::Busy);
        }
        Ok(())
    }

    fn active_chat(&self) -> Result<&Chat, ChatError> {
        self.chat.as_ref().ok_or(ChatError::NoActiveChat)
    }

    fn active_chat_mut(&mut self) -> Result<&mut Chat, ChatError> {
        self.chat.as_mut().ok_or(ChatError::NoActiveChat)
    }

    /// Logs `err` and shows it on the status sink.
    fn reported(&self, err: ChatError) -> ChatError {
        if err.is_local() {
            warn!("{}", err);
        } else {
            error!("{}", err);
        }
        self.status.report(&format!("Error: {}", err));
        err
    }

    // --- Chats ---

    pub async fn refresh_chats(&mut self) -> Result<&[ChatSummary], ChatError> {
        match self.backend.list_chats().await {
            Ok(chats) => {
                debug!("Loaded {} chats", chats.len());
                self.chats = chats;
                Ok(&self.chats)
            }
            Err(err) => Err(self.reported(err.into())),
        }
    }

    /// Creates a chat and opens it.
    pub async fn create_chat(&mut self) -> Result<ChatId, ChatError> {
        let chat_id = match self.backend.create_chat().await {
            Ok(chat_id) => chat_id,
            Err(err) => {
                return Err(self.reported(err.into()));
            }
        };
        self.refresh_chats().await?;
        self.switch_chat(&chat_id).await?;
        Ok(chat_id)
    }

    /// Opens `chat_id`. The tree is fetched before anything changes, so a
    /// failed fetch leaves the current chat, stream and attachments intact.
    pub async fn switch_chat(&mut self, chat_id: &ChatId) -> Result<(), ChatError> {
        let chat = match self.fetch_chat(chat_id).await {
            Ok(chat) => chat,
            Err(err) => {
                return Err(self.reported(err));
            }
        };

        if let Some(session) = self.session.as_mut() {
            session.cancel();
        }
        self.session = None;
        self.attachments.clear();
        info!("Switched to chat {} ({} nodes)", chat.id, chat.tree.len());
        self.chat = Some(chat);
        Ok(())
    }

    async fn fetch_chat(&self, chat_id: &ChatId) -> Result<Chat, ChatError> {
        let response = self.backend.get_chat_tree(chat_id).await?;
        let tree = ConversationTree::from_wire(response.root, response.current_node_id)?;
        Ok(Chat {
            id: chat_id.clone(),
            title: response.title,
            tree,
        })
    }

    /// Replaces the local tree with the backend's copy of the current chat.
    pub async fn reload_tree(&mut self) -> Result<(), ChatError> {
        let result = self.resync().await;
        result.map_err(|err| self.reported(err))
    }

    /// Messages on the current branch of the open chat, root excluded. When
    /// the current node cannot be placed in the local tree, the tree is
    /// reloaded once and the path resolved again.
    pub async fn current_path(&mut self) -> Result<Vec<Node>, ChatError> {
        match self.visible_nodes() {
            Err(ChatError::PathResolution(missing)) => {
                warn!("Current node {} is not in the local tree; reloading", missing);
            }
            other => {
                return other;
            }
        }
        let result = match self.resync().await {
            Ok(()) => self.visible_nodes(),
            Err(err) => Err(err),
        };
        result.map_err(|err| self.reported(err))
    }

    fn visible_nodes(&self) -> Result<Vec<Node>, ChatError> {
        let path = self.active_chat()?.tree.visible_path()?;
        Ok(path.into_iter().cloned().collect())
    }

    async fn resync(&mut self) -> Result<(), ChatError> {
        let chat_id = self.active_chat()?.id.clone();
        let fresh = self.fetch_chat(&chat_id).await?;
        debug!("Reloaded tree of chat {} ({} nodes)", chat_id, fresh.tree.len());
        self.chat = Some(fresh);
        Ok(())
    }

    /// Deletes `chat_id`. Deleting the open chat moves to the most recent
    /// remaining chat, or to a fresh one when none is left.
    pub async fn delete_chat(&mut self, chat_id: &ChatId) -> Result<(), ChatError> {
        match self.backend.delete_chat(chat_id).await {
            Ok(true) => {}
            Ok(false) => {
                let err = BackendError::Rejected(format!("chat {} was not deleted", chat_id));
                return Err(self.reported(err.into()));
            }
            Err(err) => {
                return Err(self.reported(err.into()));
            }
        }
        info!("Deleted chat {}", chat_id);

        let was_current = self.current_chat_id() == Some(chat_id);
        if was_current {
            if let Some(session) = self.session.as_mut() {
                session.cancel();
            }
            self.session = None;
            self.chat = None;
            self.attachments.clear();
        }

        self.refresh_chats().await?;
        if !was_current {
            return Ok(());
        }
        match self.chats.first().map(|summary| summary.id.clone()) {
            Some(next) => self.switch_chat(&next).await,
            None => self.create_chat().await.map(|_| ()),
        }
    }

    // --- Messages ---

    /// Sends a user message under the current tip and opens the reply stream.
    /// Returns the id of the new user node.
    pub async fn send(&mut self, text: &str, files: &[FileId]) -> Result<NodeId, ChatError> {
        let result = self.try_send(text, files).await;
        result.map_err(|err| self.reported(err))
    }

    /// `send` with the staged attachments.
    pub async fn send_pending(&mut self, text: &str) -> Result<NodeId, ChatError> {
        let files = self.attachments.ids().to_vec();
        self.send(text, &files).await
    }

    async fn try_send(&mut self, text: &str, files: &[FileId]) -> Result<NodeId, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        self.ensure_idle()?;
        let chat = self.active_chat()?;
        let chat_id = chat.id.clone();
        let parent = chat.tree
            .current_node_id()
            .cloned()
            .unwrap_or_else(|| chat.tree.root_id().clone());

        self.status.report("Sending message...");
        let receipt = self.backend.send_message(&chat_id, text, files).await?;
        info!("Sent message {} in chat {}", receipt.node_id, chat_id);

        let node = Node::new(receipt.node_id.clone(), Role::User, text).with_files(files.to_vec());
        let applied = self.active_chat_mut()?.tree.apply_new_node(&parent, node);
        if let Err(err) = applied {
            warn!("Local tree out of sync after send ({}); reloading", err);
            self.resync().await?;
        }

        if let Some(title) = receipt.updated_title {
            self.rename_current(title);
        }
        self.attachments.clear();

        self.open_session(&receipt.node_id, StreamMode::New).await?;
        Ok(receipt.node_id)
    }

    fn rename_current(&mut self, title: String) {
        if let Some(chat) = self.chat.as_mut() {
            if let Some(summary) = self.chats.iter_mut().find(|summary| summary.id == chat.id) {
                summary.title = title.clone();
            }
            info!("Chat {} is now titled '{}'", chat.id, title);
            chat.title = title;
        }
    }

    /// Extends the assistant message at the tip of the current branch.
    pub async fn continue_last(&mut self, node_id: &NodeId) -> Result<(), ChatError> {
        let result = self.try_continue(node_id).await;
        result.map_err(|err| self.reported(err))
    }

    async fn try_continue(&mut self, node_id: &NodeId) -> Result<(), ChatError> {
        self.ensure_idle()?;
        let chat = self.active_chat()?;
        let is_last_assistant = chat.tree
            .tip()
            .map(|tip| tip.id == *node_id && tip.role == Role::Assistant)
            .unwrap_or(false);
        if !is_last_assistant {
            return Err(ChatError::InvalidContinuationTarget(node_id.clone()));
        }
        let chat_id = chat.id.clone();

        self.status.report("Continuing response...");
        if !self.backend.continue_node(&chat_id, node_id).await? {
            return Err(BackendError::Rejected(format!("node {} cannot be continued", node_id)).into());
        }
        self.open_session(node_id, StreamMode::Continuation).await
    }

    /// Forks the branch at `node_id` with `new_content`. When the backend asks
    /// for a reply (edited user messages), the reply stream is opened.
    /// Returns the id the backend gave the edited message, which is `node_id`
    /// itself when the backend edited it in place.
    pub async fn edit(&mut self, node_id: &NodeId, new_content: &str) -> Result<NodeId, ChatError> {
        let result = self.try_edit(node_id, new_content).await;
        result.map_err(|err| self.reported(err))
    }

    async fn try_edit(&mut self, node_id: &NodeId, new_content: &str) -> Result<NodeId, ChatError> {
        self.ensure_idle()?;
        let chat = self.active_chat()?;
        let original = chat.tree
            .get(node_id)
            .ok_or_else(|| TreeError::NodeNotFound(node_id.clone()))?;
        if original.is_root() {
            return Err(TreeError::RootNotEditable.into());
        }
        let files = original.files.clone();
        let chat_id = chat.id.clone();

        self.status.report("Saving edit...");
        let receipt = self.backend.edit_node(&chat_id, node_id, new_content, &files).await?;
        let new_id = receipt.node_id;
        info!("Edited {} into {} (generate: {})", node_id, new_id, receipt.should_generate);

        // The backend may have edited the node in place.
        let applied = self.active_chat_mut()?.tree.apply_edit(node_id, new_id.clone(), new_content);
        if let Err(err) = applied {
            warn!("Local tree cannot mirror the edit of {} ({}); reloading", node_id, err);
            self.resync().await?;
        } else if self.refetch_after_edit {
            if let Err(err) = self.resync().await {
                warn!("Keeping the local edit of {}: {}", node_id, err);
                self.status.report("Edit saved; the chat could not be reloaded");
            }
        }

        if receipt.should_generate {
            self.open_session(&new_id, StreamMode::New).await?;
        }
        Ok(new_id)
    }

    // --- Streaming ---

    async fn open_session(&mut self, target_id: &NodeId, mode: StreamMode) -> Result<(), ChatError> {
        let chat = self.active_chat()?;
        let chat_id = chat.id.clone();
        let target = chat.tree
            .get(target_id)
            .cloned()
            .ok_or_else(|| TreeError::NodeNotFound(target_id.clone()))?;

        if let Some(previous) = self.session.as_mut() {
            previous.settle();
        }
        let mut session = StreamSession::open(
            chat_id.clone(),
            &target,
            mode,
            self.status.clone(),
            self.max_coalesced_events
        );

        match self.backend.open_stream(&chat_id, target_id).await {
            Ok(events) => {
                session.attach(events);
                self.session = Some(session);
                Ok(())
            }
            Err(err) => {
                session.fail_open(&err);
                self.session = Some(session);
                Err(ChatError::Transport(err.to_string()))
            }
        }
    }

    /// Folds the next batch of stream events. `Ok(None)` when no stream is
    /// being read. A finished stream is recorded in the tree; a failed one
    /// comes back as `Err` with its partial content left in the render state.
    pub async fn pump_stream(&mut self) -> Result<Option<StreamUpdate>, ChatError> {
        let update = match self.session.as_mut() {
            Some(session) => session.next_update().await,
            None => None,
        };

        match update {
            Some(StreamUpdate::Finished(node_id)) => {
                self.record_finished(&node_id).await;
                Ok(Some(StreamUpdate::Finished(node_id)))
            }
            Some(StreamUpdate::Errored(message)) => {
                let failure = self.session.as_ref().and_then(|session| session.failure().cloned());
                let err = match failure {
                    Some(failure) => ChatError::from(failure),
                    None => ChatError::ApplicationStream(message),
                };
                error!("{}", err);
                Err(err)
            }
            other => Ok(other),
        }
    }

    /// Reads the active stream to its end.
    pub async fn finish_stream(&mut self) -> Result<StreamState, ChatError> {
        while self.pump_stream().await?.is_some() {}
        Ok(self.stream_state())
    }

    async fn record_finished(&mut self, node_id: &NodeId) {
        let (origin, node, resync) = match self.session.as_ref() {
            Some(session) => {
                let render = session.render();
                // Tool rounds and continuations add nodes the stream never names.
                let resync =
                    session.mode() == StreamMode::Continuation ||
                    !render.tool_call_blocks().is_empty();
                (session.origin().clone(), render.to_node(), resync)
            }
            None => {
                return;
            }
        };

        let recorded = match self.chat.as_mut() {
            Some(chat) => chat.tree.settle_streamed(&origin, node),
            None => {
                return;
            }
        };
        let recorded = match recorded {
            Ok(()) => {
                debug!("Recorded streamed node {}", node_id);
                true
            }
            Err(err) => {
                warn!("Could not record streamed node {}: {}", node_id, err);
                false
            }
        };

        if resync || !recorded {
            if let Err(err) = self.resync().await {
                warn!("Tree of the finished stream not reloaded: {}", err);
            }
        }
    }

    /// Cancels the active stream, keeping what it has rendered so far.
    pub fn stop(&mut self) -> bool {
        let stopped = self.session
            .as_mut()
            .map(StreamSession::cancel)
            .unwrap_or(false);
        if stopped {
            self.status.report("Generation stopped");
        }
        stopped
    }

    // --- Attachments, files and tools ---

    pub fn add_attachment(&mut self, id: FileId) -> bool {
        self.attachments.add(id)
    }

    pub fn remove_attachment(&mut self, id: &FileId) -> bool {
        self.attachments.remove(id)
    }

    pub fn file_name(&self, id: &FileId) -> Option<&str> {
        self.files.get(id).map(|file| file.filename.as_str())
    }

    pub async fn refresh_files(&mut self) -> Result<&HashMap<FileId, FileRef>, ChatError> {
        match self.backend.list_files().await {
            Ok(files) => {
                self.files = files;
                Ok(&self.files)
            }
            Err(err) => Err(self.reported(err.into())),
        }
    }

    /// Uploads a file and stages it for the next message.
    pub async fn upload_file(&mut self, bytes: Vec<u8>, filename: &str) -> Result<FileRef, ChatError> {
        self.status.report(&format!("Uploading {}...", filename));
        let file = match self.backend.upload_file(bytes, filename).await {
            Ok(file) => file,
            Err(err) => {
                return Err(self.reported(err.into()));
            }
        };
        self.files.insert(file.uuid.clone(), file.clone());
        self.attachments.add(file.uuid.clone());
        Ok(file)
    }

    pub async fn refresh_tools(&mut self) -> Result<&ToolList, ChatError> {
        match self.backend.list_tools().await {
            Ok(tools) => {
                self.tools = tools;
                Ok(&self.tools)
            }
            Err(err) => Err(self.reported(err.into())),
        }
    }

    pub async fn set_tool_enabled(&mut self, name: &str, enabled: bool) -> Result<(), ChatError> {
        match self.backend.set_tool_enabled(name, enabled).await {
            Ok(true) => {
                self.tools.enabled.insert(name.to_string(), enabled);
                info!("Tool {} {}", name, if enabled { "enabled" } else { "disabled" });
                Ok(())
            }
            Ok(false) => {
                let err = BackendError::Rejected(format!("tool {} was not toggled", name));
                Err(self.reported(err.into()))
            }
            Err(err) => Err(self.reported(err.into())),
        }
    }
}
