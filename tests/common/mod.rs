#![allow(dead_code)]

use async_trait::async_trait;
use futures::{ stream, StreamExt };
use std::collections::{ HashMap, HashSet, VecDeque };
use std::sync::{ Arc, Mutex };
use tokio::sync::mpsc::UnboundedReceiver;
use url::Url;

use branch_chat::backend::{
    Backend,
    BackendError,
    ChatTreeResponse,
    EditReceipt,
    EventStream,
    SendReceipt,
};
use branch_chat::config::ClientConfig;
use branch_chat::controller::ChatSessionController;
use branch_chat::models::chat::{
    ChatId,
    ChatSummary,
    FileId,
    FileRef,
    Node,
    NodeId,
    Role,
    ToolList,
    WireNode,
};
use branch_chat::models::stream::StreamEvent;
use branch_chat::status::ChannelStatusSink;
use branch_chat::tree::ConversationTree;

/// Events one `open_stream` call hands out, and what happens after them.
pub struct StreamScript {
    events: Vec<Result<StreamEvent, BackendError>>,
    hang: bool,
}

impl StreamScript {
    pub fn new(events: Vec<StreamEvent>) -> Self {
        Self {
            events: events.into_iter().map(Ok).collect(),
            hang: false,
        }
    }

    /// A plain reply: one content event, then `finished`.
    pub fn reply(node_id: &str, text: &str) -> Self {
        Self::new(vec![StreamEvent::content(text), StreamEvent::finished(node_id)])
    }

    /// The connection breaks after the scripted events.
    pub fn then_fail(mut self, detail: &str) -> Self {
        self.events.push(Err(BackendError::Transport(detail.to_string())));
        self
    }

    /// The stream stays open after the scripted events.
    pub fn then_hang(mut self) -> Self {
        self.hang = true;
        self
    }
}

struct StoredChat {
    title: String,
    tree: ConversationTree,
}

#[derive(Default)]
struct State {
    order: Vec<ChatId>,
    chats: HashMap<ChatId, StoredChat>,
    streams: VecDeque<StreamScript>,
    failing: HashSet<&'static str>,
    calls: Vec<String>,
    files: HashMap<FileId, FileRef>,
    tools: ToolList,
    next_id: usize,
    edit_in_place: bool,
}

impl State {
    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{}", prefix, self.next_id)
    }

    fn check(&mut self, operation: &'static str, call: String) -> Result<(), BackendError> {
        self.calls.push(call);
        if self.failing.contains(operation) {
            return Err(BackendError::Status { status: 500, body: "scripted failure".to_string() });
        }
        Ok(())
    }

    fn chat_mut(&mut self, chat_id: &ChatId) -> Result<&mut StoredChat, BackendError> {
        self.chats.get_mut(chat_id).ok_or_else(|| BackendError::Rejected("Chat not found".to_string()))
    }
}

/// In-memory backend with the same tree semantics as the real service.
#[derive(Default)]
pub struct ScriptedBackend {
    state: Mutex<State>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_chat(&self, id: &str, title: &str, root: WireNode, current: Option<&str>) {
        let tree = ConversationTree::from_wire(root, current.map(NodeId::from)).unwrap();
        let mut state = self.state.lock().unwrap();
        state.order.push(ChatId::from(id));
        state.chats.insert(ChatId::from(id), StoredChat { title: title.to_string(), tree });
    }

    pub fn script_stream(&self, script: StreamScript) {
        self.state.lock().unwrap().streams.push_back(script);
    }

    pub fn fail(&self, operation: &'static str) {
        self.state.lock().unwrap().failing.insert(operation);
    }

    pub fn recover(&self, operation: &'static str) {
        self.state.lock().unwrap().failing.remove(operation);
    }

    /// Edits overwrite the node and drop its replies instead of forking.
    pub fn edit_in_place(&self) {
        self.state.lock().unwrap().edit_in_place = true;
    }

    pub fn set_current(&self, chat_id: &str, node_id: &str) {
        let mut state = self.state.lock().unwrap();
        let chat = state.chats.get_mut(&ChatId::from(chat_id)).unwrap();
        chat.tree.set_current(&NodeId::from(node_id)).unwrap();
    }

    pub fn set_tools(&self, tools: ToolList) {
        self.state.lock().unwrap().tools = tools;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.split_whitespace().next() == Some(operation))
            .count()
    }

    pub fn tree(&self, chat_id: &str) -> ConversationTree {
        self.state.lock().unwrap().chats[&ChatId::from(chat_id)].tree.clone()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn list_chats(&self) -> Result<Vec<ChatSummary>, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.check("list_chats", "list_chats".to_string())?;
        Ok(
            state.order
                .iter()
                .rev()
                .map(|id| ChatSummary {
                    id: id.clone(),
                    title: state.chats[id].title.clone(),
                    created_at: None,
                    updated_at: None,
                })
                .collect()
        )
    }

    async fn create_chat(&self) -> Result<ChatId, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.check("create_chat", "create_chat".to_string())?;
        let chat_id = ChatId::new(state.fresh_id("chat-"));
        let root = Node::new(
            NodeId::new(state.fresh_id("root-")),
            Role::System,
            "You are a helpful AI assistant."
        );
        let root_id = root.id.clone();
        let mut tree = ConversationTree::new(root).unwrap();
        tree.set_current(&root_id).unwrap();
        state.order.push(chat_id.clone());
        state.chats.insert(chat_id.clone(), StoredChat { title: "New Chat".to_string(), tree });
        Ok(chat_id)
    }

    async fn delete_chat(&self, chat_id: &ChatId) -> Result<bool, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.check("delete_chat", format!("delete_chat {}", chat_id))?;
        state.order.retain(|id| id != chat_id);
        Ok(state.chats.remove(chat_id).is_some())
    }

    async fn get_chat_tree(&self, chat_id: &ChatId) -> Result<ChatTreeResponse, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.check("get_chat_tree", format!("get_chat_tree {}", chat_id))?;
        let chat = state.chat_mut(chat_id)?;
        Ok(ChatTreeResponse {
            title: chat.title.clone(),
            current_node_id: chat.tree.current_node_id().cloned(),
            root: chat.tree.to_wire(),
        })
    }

    async fn send_message(
        &self,
        chat_id: &ChatId,
        text: &str,
        files: &[FileId]
    ) -> Result<SendReceipt, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.check("send_message", format!("send_message {} {}", chat_id, text))?;
        let node_id = NodeId::new(state.fresh_id("n"));
        let chat = state.chat_mut(chat_id)?;
        let parent = chat.tree
            .current_node_id()
            .cloned()
            .unwrap_or_else(|| chat.tree.root_id().clone());
        let node = Node::new(node_id.clone(), Role::User, text).with_files(files.to_vec());
        chat.tree.apply_new_node(&parent, node).map_err(|e| BackendError::Rejected(e.to_string()))?;

        let updated_title = if chat.title == "New Chat" {
            chat.title = text.chars().take(30).collect();
            Some(chat.title.clone())
        } else {
            None
        };
        Ok(SendReceipt { node_id, updated_title })
    }

    async fn continue_node(&self, chat_id: &ChatId, node_id: &NodeId) -> Result<bool, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.check("continue_node", format!("continue_node {} {}", chat_id, node_id))?;
        let chat = state.chat_mut(chat_id)?;
        match chat.tree.get(node_id) {
            Some(node) if node.role == Role::Assistant => {}
            Some(_) => {
                return Err(BackendError::Rejected("Can only continue assistant messages".into()));
            }
            None => {
                return Err(BackendError::Rejected("Node not found".into()));
            }
        }
        chat.tree.set_current(node_id).map_err(|e| BackendError::Rejected(e.to_string()))?;
        Ok(true)
    }

    async fn edit_node(
        &self,
        chat_id: &ChatId,
        node_id: &NodeId,
        text: &str,
        files: &[FileId]
    ) -> Result<EditReceipt, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.check("edit_node", format!("edit_node {} {} {} files={}", chat_id, node_id, text, files.len()))?;
        let in_place = state.edit_in_place;
        let new_id = NodeId::new(state.fresh_id("e"));
        let chat = state.chat_mut(chat_id)?;
        let role = chat.tree
            .get(node_id)
            .map(|node| node.role)
            .ok_or_else(|| BackendError::Rejected("Node not found".into()))?;
        if in_place {
            let mut root = chat.tree.to_wire();
            overwrite(&mut root, node_id, text);
            chat.tree = ConversationTree::from_wire(root, Some(node_id.clone())).unwrap();
            return Ok(EditReceipt { node_id: node_id.clone(), should_generate: role == Role::User });
        }
        let node_id = chat.tree
            .apply_edit(node_id, new_id, text)
            .map_err(|e| BackendError::Rejected(e.to_string()))?;
        Ok(EditReceipt { node_id, should_generate: role == Role::User })
    }

    async fn open_stream(&self, chat_id: &ChatId, node_id: &NodeId) -> Result<EventStream, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.check("open_stream", format!("open_stream {} {}", chat_id, node_id))?;
        let script = state.streams
            .pop_front()
            .ok_or_else(|| BackendError::Transport("no stream scripted".to_string()))?;

        // Persist the reply the way the service does once generation completes.
        let finished = script.events.iter().find_map(|event| {
            match event {
                Ok(StreamEvent::Finished { node_id, .. }) => Some(node_id.clone()),
                _ => None,
            }
        });
        if let Some(finished) = finished {
            let content: String = script.events
                .iter()
                .filter_map(|event| {
                    match event {
                        Ok(StreamEvent::Content { content }) => Some(content.as_str()),
                        _ => None,
                    }
                })
                .collect();
            let chat = state.chat_mut(chat_id)?;
            let reply = Node::new(finished, Role::Assistant, content);
            chat.tree
                .settle_streamed(node_id, reply)
                .map_err(|e| BackendError::Rejected(e.to_string()))?;
        }

        let events = stream::iter(script.events);
        if script.hang {
            Ok(Box::pin(events.chain(stream::pending())))
        } else {
            Ok(Box::pin(events))
        }
    }

    async fn list_files(&self) -> Result<HashMap<FileId, FileRef>, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.check("list_files", "list_files".to_string())?;
        Ok(state.files.clone())
    }

    async fn upload_file(&self, bytes: Vec<u8>, filename: &str) -> Result<FileRef, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.check("upload_file", format!("upload_file {}", filename))?;
        let uuid = FileId::new(state.fresh_id("file-"));
        let file = FileRef {
            uuid: uuid.clone(),
            filename: filename.to_string(),
            mime_type: Some("text/plain".to_string()),
            is_image: false,
            size: Some(bytes.len() as u64),
        };
        state.files.insert(uuid, file.clone());
        Ok(file)
    }

    async fn list_tools(&self) -> Result<ToolList, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.check("list_tools", "list_tools".to_string())?;
        Ok(state.tools.clone())
    }

    async fn set_tool_enabled(&self, name: &str, enabled: bool) -> Result<bool, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.check("set_tool_enabled", format!("set_tool_enabled {} {}", name, enabled))?;
        if !state.tools.tools.iter().any(|tool| tool == name) {
            return Err(BackendError::Rejected("Tool not found".into()));
        }
        state.tools.enabled.insert(name.to_string(), enabled);
        Ok(true)
    }
}

fn overwrite(node: &mut WireNode, id: &NodeId, text: &str) -> bool {
    if node.id == *id {
        node.content = text.to_string();
        node.children.clear();
        return true;
    }
    node.children.iter_mut().any(|child| overwrite(child, id, text))
}

/// root -> A (user "hi") -> B (assistant "hello"), current B.
pub fn hello_tree() -> WireNode {
    WireNode::new("root", Role::System, "You are a helpful AI assistant.").with_child(
        WireNode::new("A", Role::User, "hi").with_child(WireNode::new("B", Role::Assistant, "hello"))
    )
}

pub fn config() -> ClientConfig {
    ClientConfig::new(Url::parse("http://127.0.0.1:55551").unwrap())
}

pub fn controller(backend: &Arc<ScriptedBackend>) -> (ChatSessionController, UnboundedReceiver<String>) {
    controller_with(backend, config())
}

pub fn controller_with(
    backend: &Arc<ScriptedBackend>,
    config: ClientConfig
) -> (ChatSessionController, UnboundedReceiver<String>) {
    let (sink, status) = ChannelStatusSink::new();
    let backend: Arc<dyn Backend> = backend.clone();
    (ChatSessionController::new(backend, Arc::new(sink), &config), status)
}

/// A controller with the hello chat open.
pub async fn hello_controller() -> (
    Arc<ScriptedBackend>,
    ChatSessionController,
    UnboundedReceiver<String>,
) {
    let backend = ScriptedBackend::new();
    backend.add_chat("chat-a", "Greetings", hello_tree(), Some("B"));
    let (mut controller, status) = controller(&backend);
    controller.refresh_chats().await.unwrap();
    controller.switch_chat(&ChatId::from("chat-a")).await.unwrap();
    (backend, controller, status)
}

pub fn drain(status: &mut UnboundedReceiver<String>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(line) = status.try_recv() {
        lines.push(line);
    }
    lines
}
