pub mod render;
pub mod sse;

use futures::{ FutureExt, StreamExt };
use log::{ debug, info, warn };
use std::fmt;
use std::sync::Arc;

use crate::backend::{ BackendError, EventStream };
use crate::models::chat::{ ChatId, Node, NodeId, ToolCall, ToolResult };
use crate::models::stream::StreamEvent;
use crate::status::StatusSink;

use self::render::RenderState;

const TRANSPORT_ERROR_MESSAGE: &str = "Connection to the response stream was lost";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Opening,
    Streaming,
    Finished,
    Errored,
    Cancelled,
}

impl StreamState {
    /// A stream is being opened or read; other exchanges must wait.
    pub fn is_active(self) -> bool {
        matches!(self, StreamState::Opening | StreamState::Streaming)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StreamState::Finished | StreamState::Errored | StreamState::Cancelled)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamState::Idle => "idle",
            StreamState::Opening => "opening",
            StreamState::Streaming => "streaming",
            StreamState::Finished => "finished",
            StreamState::Errored => "errored",
            StreamState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Generate a new assistant node under the target.
    New,
    /// Extend the target assistant node.
    Continuation,
}

/// Why a session ended in `Errored`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFailure {
    /// The backend sent an `error` event.
    Application(String),
    /// The channel broke, timed out, or closed early.
    Transport(String),
}

/// What one step of a session changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    /// The render state changed and should be redrawn.
    Render,
    /// Events were consumed without visible change.
    Quiet,
    Finished(NodeId),
    Errored(String),
    Cancelled,
}

impl StreamUpdate {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamUpdate::Finished(_) | StreamUpdate::Errored(_) | StreamUpdate::Cancelled)
    }
}

/// One streaming exchange for one assistant node.
///
/// Events are folded into the `RenderState` strictly in arrival order. After
/// `Finished`, `Errored` or `Cancelled` the channel is dropped, later events
/// are ignored, and the accumulated content is kept as it is.
pub struct StreamSession {
    chat_id: ChatId,
    origin: NodeId,
    mode: StreamMode,
    state: StreamState,
    render: RenderState,
    events: Option<EventStream>,
    failure: Option<StreamFailure>,
    status: Arc<dyn StatusSink>,
    max_coalesced: usize,
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("chat_id", &self.chat_id)
            .field("origin", &self.origin)
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("render", &self.render)
            .field("failure", &self.failure)
            .finish()
    }
}

impl StreamSession {
    /// Starts a session in `Opening` for `target`: the node the new reply
    /// hangs under, or the assistant node being continued.
    pub fn open(
        chat_id: ChatId,
        target: &Node,
        mode: StreamMode,
        status: Arc<dyn StatusSink>,
        max_coalesced: usize
    ) -> Self {
        let render = match mode {
            StreamMode::New => RenderState::placeholder(),
            StreamMode::Continuation => RenderState::continuing(target),
        };
        info!("Opening {:?} stream for node {} in chat {}", mode, target.id, chat_id);
        Self {
            chat_id,
            origin: target.id.clone(),
            mode,
            state: StreamState::Opening,
            render,
            events: None,
            failure: None,
            status,
            max_coalesced,
        }
    }

    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    pub fn origin(&self) -> &NodeId {
        &self.origin
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn render(&self) -> &RenderState {
        &self.render
    }

    pub fn failure(&self) -> Option<&StreamFailure> {
        self.failure.as_ref()
    }

    /// Hands the opened channel to the session: `Opening -> Streaming`.
    pub fn attach(&mut self, events: EventStream) {
        if self.state != StreamState::Opening {
            warn!("Dropping stream attached to a {} session", self.state);
            return;
        }
        self.events = Some(events);
        self.state = StreamState::Streaming;
    }

    /// The channel could not be opened at all.
    pub fn fail_open(&mut self, err: &BackendError) -> StreamUpdate {
        if self.state != StreamState::Opening {
            return StreamUpdate::Quiet;
        }
        self.fail_transport(&err.to_string())
    }

    /// Folds one event into the session.
    pub fn apply(&mut self, event: StreamEvent) -> StreamUpdate {
        if !self.state.is_active() {
            debug!("Ignoring {} event for a {} session", event.kind(), self.state);
            return StreamUpdate::Quiet;
        }

        match event {
            StreamEvent::Status { content } => {
                self.status.report(&content);
                StreamUpdate::Quiet
            }
            StreamEvent::Timings { timings } => {
                self.render.replace_timings(timings);
                StreamUpdate::Render
            }
            StreamEvent::Content { content } => {
                self.render.append_content(&content);
                StreamUpdate::Render
            }
            // Reasoning text is not displayed.
            StreamEvent::ReasoningContent { .. } => StreamUpdate::Quiet,
            StreamEvent::ToolCall { name, args } => {
                self.render.push_tool_call(ToolCall::new(name, args));
                StreamUpdate::Render
            }
            StreamEvent::ToolResult { tool_call_id, result } => {
                self.render.push_tool_result(ToolResult { tool_call_id, content: result });
                StreamUpdate::Render
            }
            StreamEvent::Finished { node_id, final_content } => {
                if let Some(final_content) = final_content {
                    if final_content != self.render.accumulated_content() {
                        debug!(
                            "Final content for {} differs from the streamed text; keeping the streamed text",
                            node_id
                        );
                    }
                }
                self.render.adopt_node_id(node_id.clone());
                self.close(StreamState::Finished);
                info!("Stream for node {} finished as {}", self.origin, node_id);
                StreamUpdate::Finished(node_id)
            }
            StreamEvent::Error { message } => {
                warn!("Stream for node {} reported an error: {}", self.origin, message);
                self.status.report(&format!("Error: {}", message));
                self.failure = Some(StreamFailure::Application(message.clone()));
                self.close(StreamState::Errored);
                StreamUpdate::Errored(message)
            }
            StreamEvent::Unknown => {
                debug!("Ignoring unknown stream event");
                StreamUpdate::Quiet
            }
        }
    }

    /// Waits for the next event and folds it, plus any events that are
    /// already buffered (at most `max_coalesced`), into one update.
    /// `None` when the session is not streaming.
    pub async fn next_update(&mut self) -> Option<StreamUpdate> {
        if self.state != StreamState::Streaming {
            return None;
        }
        let next = match self.events.as_mut() {
            Some(events) => events.next().await,
            None => None,
        };
        let mut update = self.receive(next);

        let mut coalesced = 0;
        while !update.is_terminal() && coalesced < self.max_coalesced {
            let ready = match self.events.as_mut() {
                Some(events) => events.next().now_or_never(),
                None => None,
            };
            let next = match ready {
                Some(next) => next,
                None => break,
            };
            coalesced += 1;
            update = match (update, self.receive(next)) {
                (_, terminal) if terminal.is_terminal() => terminal,
                (StreamUpdate::Render, _) | (_, StreamUpdate::Render) => StreamUpdate::Render,
                _ => StreamUpdate::Quiet,
            };
        }

        Some(update)
    }

    fn receive(&mut self, next: Option<Result<StreamEvent, BackendError>>) -> StreamUpdate {
        match next {
            Some(Ok(event)) => self.apply(event),
            Some(Err(err)) => self.fail_transport(&err.to_string()),
            None => self.fail_transport("stream closed before the response finished"),
        }
    }

    fn fail_transport(&mut self, detail: &str) -> StreamUpdate {
        warn!("Stream for node {} failed: {}", self.origin, detail);
        self.status.report(&format!("Error: {}", TRANSPORT_ERROR_MESSAGE));
        self.failure = Some(StreamFailure::Transport(detail.to_string()));
        self.close(StreamState::Errored);
        StreamUpdate::Errored(TRANSPORT_ERROR_MESSAGE.to_string())
    }

    /// Stops the exchange early, keeping what has arrived. Only the first
    /// call on an open session has an effect.
    pub fn cancel(&mut self) -> bool {
        if !self.state.is_active() {
            return false;
        }
        info!("Cancelling stream for node {}", self.origin);
        self.close(StreamState::Cancelled);
        true
    }

    /// Returns a terminal session to `Idle`.
    pub fn settle(&mut self) {
        if self.state.is_terminal() {
            self.state = StreamState::Idle;
        }
    }

    fn close(&mut self, state: StreamState) {
        // Dropping the receiver stops the reader task at its next send.
        self.events = None;
        self.render.stop();
        self.state = state;
    }
}
