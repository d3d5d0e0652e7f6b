use log::debug;
use std::collections::HashMap;
use thiserror::Error;

use crate::models::chat::{ ChatId, FileId, Node, NodeId, Role, WireNode };

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("current node '{0}' is not reachable from the root")]
    PathResolution(NodeId),
    #[error("node '{0}' not found")]
    NodeNotFound(NodeId),
    #[error("node '{0}' already exists")]
    DuplicateNode(NodeId),
    #[error("root node must have role system, found {0}")]
    InvalidRoot(Role),
    #[error("the root node cannot be edited")]
    RootNotEditable,
}

/// A chat the controller has open: its id, title and message tree.
#[derive(Debug, Clone)]
pub struct Chat {
    pub id: ChatId,
    pub title: String,
    pub tree: ConversationTree,
}

/// Message tree of one chat, stored as an arena keyed by node id.
///
/// The root is always a `system` node. `current` marks the tip of the
/// branch being displayed; it is `None` only for an uninitialized tree.
#[derive(Debug, Clone)]
pub struct ConversationTree {
    root: NodeId,
    nodes: HashMap<NodeId, Node>,
    current: Option<NodeId>,
}

impl ConversationTree {
    pub fn new(mut root: Node) -> Result<Self, TreeError> {
        if root.role != Role::System {
            return Err(TreeError::InvalidRoot(root.role));
        }
        root.parent = None;
        root.children.clear();
        let root_id = root.id.clone();
        let mut nodes = HashMap::new();
        nodes.insert(root_id.clone(), root);
        Ok(Self {
            root: root_id,
            nodes,
            current: None,
        })
    }

    /// Builds the arena from the nested format returned by the backend.
    ///
    /// `current` is kept even when it does not name a node of the tree, so
    /// the desync surfaces from `resolve_current_path`.
    pub fn from_wire(root: WireNode, current: Option<NodeId>) -> Result<Self, TreeError> {
        if root.role != Role::System {
            return Err(TreeError::InvalidRoot(root.role));
        }
        let root_id = root.id.clone();
        let mut nodes: HashMap<NodeId, Node> = HashMap::new();
        let mut pending: Vec<(WireNode, Option<NodeId>)> = vec![(root, None)];

        while let Some((wire, parent)) = pending.pop() {
            let id = wire.id.clone();
            if nodes.contains_key(&id) {
                return Err(TreeError::DuplicateNode(id));
            }
            let children: Vec<NodeId> = wire.children
                .iter()
                .map(|child| child.id.clone())
                .collect();
            let node = Node {
                id: id.clone(),
                role: wire.role,
                content: wire.content,
                tool_calls: wire.tool_calls,
                tool_results: wire.tool_results,
                files: wire.files,
                parent,
                children,
            };
            nodes.insert(id.clone(), node);
            for child in wire.children.into_iter().rev() {
                pending.push((child, Some(id.clone())));
            }
        }

        debug!("Decoded chat tree with {} nodes", nodes.len());
        Ok(Self {
            root: root_id,
            nodes,
            current,
        })
    }

    /// Nested representation, children in insertion order.
    pub fn to_wire(&self) -> WireNode {
        self.wire_subtree(&self.root)
    }

    fn wire_subtree(&self, id: &NodeId) -> WireNode {
        let node = &self.nodes[id];
        WireNode {
            id: node.id.clone(),
            role: node.role,
            content: node.content.clone(),
            tool_calls: node.tool_calls.clone(),
            tool_results: node.tool_results.clone(),
            files: node.files.clone(),
            children: node.children
                .iter()
                .filter(|child| self.nodes.contains_key(*child))
                .map(|child| self.wire_subtree(child))
                .collect(),
            parent_id: node.parent.clone(),
        }
    }

    pub fn root(&self) -> &Node {
        &self.nodes[&self.root]
    }

    pub fn root_id(&self) -> &NodeId {
        &self.root
    }

    pub fn current_node_id(&self) -> Option<&NodeId> {
        self.current.as_ref()
    }

    pub fn set_current(&mut self, id: &NodeId) -> Result<(), TreeError> {
        if !self.nodes.contains_key(id) {
            return Err(TreeError::NodeNotFound(id.clone()));
        }
        self.current = Some(id.clone());
        Ok(())
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn tip(&self) -> Option<&Node> {
        self.current.as_ref().and_then(|id| self.nodes.get(id))
    }

    pub fn children_of(&self, id: &NodeId) -> Vec<&Node> {
        self.nodes
            .get(id)
            .map(|node| node.children.iter().filter_map(|child| self.nodes.get(child)).collect())
            .unwrap_or_default()
    }

    /// All children of `id`'s parent, `id` included, in creation order.
    /// These are the alternative branches an edit has produced.
    pub fn siblings_of(&self, id: &NodeId) -> Vec<&Node> {
        match self.nodes.get(id).and_then(|node| node.parent.as_ref()) {
            Some(parent) => self.children_of(parent),
            None => self.nodes.get(id).into_iter().collect(),
        }
    }

    /// Root-to-tip sequence of the active branch.
    ///
    /// Depth-first from the root; at every node the search descends into the
    /// first child, in insertion order, whose subtree holds the current node.
    pub fn resolve_current_path(&self) -> Result<Vec<&Node>, TreeError> {
        let target = match &self.current {
            Some(id) => id,
            None => return Ok(Vec::new()),
        };

        let mut stack: Vec<(&Node, usize)> = vec![(self.root(), 0)];
        while let Some(&(node, next)) = stack.last() {
            if node.id == *target {
                return Ok(stack.into_iter().map(|(node, _)| node).collect());
            }
            match node.children.get(next) {
                Some(child_id) => {
                    if let Some(frame) = stack.last_mut() {
                        frame.1 += 1;
                    }
                    if let Some(child) = self.nodes.get(child_id) {
                        stack.push((child, 0));
                    }
                }
                None => {
                    stack.pop();
                }
            }
        }

        Err(TreeError::PathResolution(target.clone()))
    }

    /// The current path without the root, which is never displayed.
    pub fn visible_path(&self) -> Result<Vec<&Node>, TreeError> {
        let mut path = self.resolve_current_path()?;
        if !path.is_empty() {
            path.remove(0);
        }
        Ok(path)
    }

    pub fn apply_new_node(&mut self, parent_id: &NodeId, mut node: Node) -> Result<(), TreeError> {
        if self.nodes.contains_key(&node.id) {
            return Err(TreeError::DuplicateNode(node.id));
        }
        let parent = self.nodes
            .get_mut(parent_id)
            .ok_or_else(|| TreeError::NodeNotFound(parent_id.clone()))?;
        parent.children.push(node.id.clone());

        node.parent = Some(parent_id.clone());
        node.children.clear();
        let id = node.id.clone();
        self.nodes.insert(id.clone(), node);
        self.current = Some(id);
        Ok(())
    }

    /// Forks the branch at `node_id`: a sibling with the same role and files
    /// carries `new_content`, and becomes the current node. The original
    /// subtree stays in place, off the active path.
    pub fn apply_edit(
        &mut self,
        node_id: &NodeId,
        new_node_id: NodeId,
        new_content: &str
    ) -> Result<NodeId, TreeError> {
        let original = self.nodes
            .get(node_id)
            .ok_or_else(|| TreeError::NodeNotFound(node_id.clone()))?;
        let parent = original.parent.clone().ok_or(TreeError::RootNotEditable)?;
        let files: Vec<FileId> = original.files.clone();
        let edited = Node::new(new_node_id.clone(), original.role, new_content).with_files(files);

        self.apply_new_node(&parent, edited)?;
        Ok(new_node_id)
    }

    /// Records a streamed assistant node and makes it current.
    ///
    /// A node the tree already holds (a continuation) gets its content and
    /// tool blocks replaced; otherwise it is attached under `parent_id`.
    pub fn settle_streamed(&mut self, parent_id: &NodeId, node: Node) -> Result<(), TreeError> {
        match self.nodes.get_mut(&node.id) {
            Some(existing) => {
                existing.content = node.content;
                existing.tool_calls = node.tool_calls;
                existing.tool_results = node.tool_results;
                self.current = Some(node.id);
                Ok(())
            }
            None => self.apply_new_node(parent_id, node),
        }
    }
}
