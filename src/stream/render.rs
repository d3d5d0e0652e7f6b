use uuid::Uuid;

use crate::models::chat::{ Node, NodeId, Role, ToolCall, ToolResult };
use crate::models::stream::Timings;

/// View-model of the assistant node being generated.
///
/// Content only ever grows; blocks are only ever appended. A renderer shows
/// tool calls, then tool results, then the text (see `sections`).
#[derive(Debug, Clone)]
pub struct RenderState {
    node_id: NodeId,
    provisional: bool,
    accumulated_content: String,
    tool_call_blocks: Vec<ToolCall>,
    tool_result_blocks: Vec<ToolResult>,
    timings: Option<Timings>,
    streaming_active: bool,
}

/// One displayable piece of a `RenderState`, in display order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RenderSection<'a> {
    ToolCall(&'a ToolCall),
    ToolResult(&'a ToolResult),
    Content(&'a str),
}

impl RenderState {
    /// Target for a brand new assistant reply. Its id is provisional until
    /// the stream reports the node the backend created.
    pub fn placeholder() -> Self {
        Self {
            node_id: NodeId::new(format!("pending-{}", Uuid::new_v4())),
            provisional: true,
            accumulated_content: String::new(),
            tool_call_blocks: Vec::new(),
            tool_result_blocks: Vec::new(),
            timings: None,
            streaming_active: true,
        }
    }

    /// Target for continuing `node`: starts from what it already shows.
    pub fn continuing(node: &Node) -> Self {
        Self {
            node_id: node.id.clone(),
            provisional: false,
            accumulated_content: node.content.clone(),
            tool_call_blocks: node.tool_calls.clone(),
            tool_result_blocks: node.tool_results.clone(),
            timings: None,
            streaming_active: true,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn is_provisional(&self) -> bool {
        self.provisional
    }

    pub fn accumulated_content(&self) -> &str {
        &self.accumulated_content
    }

    pub fn tool_call_blocks(&self) -> &[ToolCall] {
        &self.tool_call_blocks
    }

    pub fn tool_result_blocks(&self) -> &[ToolResult] {
        &self.tool_result_blocks
    }

    pub fn timings(&self) -> Option<&Timings> {
        self.timings.as_ref()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming_active
    }

    pub fn sections(&self) -> Vec<RenderSection<'_>> {
        let mut sections: Vec<RenderSection<'_>> = self.tool_call_blocks
            .iter()
            .map(RenderSection::ToolCall)
            .collect();
        sections.extend(self.tool_result_blocks.iter().map(RenderSection::ToolResult));
        if !self.accumulated_content.is_empty() {
            sections.push(RenderSection::Content(&self.accumulated_content));
        }
        sections
    }

    pub(crate) fn append_content(&mut self, fragment: &str) {
        self.accumulated_content.push_str(fragment);
    }

    pub(crate) fn push_tool_call(&mut self, call: ToolCall) {
        self.tool_call_blocks.push(call);
    }

    pub(crate) fn push_tool_result(&mut self, result: ToolResult) {
        self.tool_result_blocks.push(result);
    }

    pub(crate) fn replace_timings(&mut self, timings: Timings) {
        self.timings = Some(timings);
    }

    pub(crate) fn adopt_node_id(&mut self, node_id: NodeId) {
        self.node_id = node_id;
        self.provisional = false;
    }

    pub(crate) fn stop(&mut self) {
        self.streaming_active = false;
    }

    /// Snapshot as a tree node, for recording a finished stream.
    pub fn to_node(&self) -> Node {
        let mut node = Node::new(self.node_id.clone(), Role::Assistant, self.accumulated_content.clone());
        node.tool_calls = self.tool_call_blocks.clone();
        node.tool_results = self.tool_result_blocks.clone();
        node
    }
}

impl PartialEq for RenderState {
    fn eq(&self, other: &Self) -> bool {
        self.accumulated_content == other.accumulated_content &&
            self.tool_call_blocks == other.tool_call_blocks &&
            self.tool_result_blocks == other.tool_result_blocks &&
            self.timings == other.timings
    }
}
