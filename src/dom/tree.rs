//! Immutable DOM snapshot
//!
//! The page hook serializes `document.documentElement` as a flat, pre-order
//! node list (`DocumentSnapshot`) where each node names its parent by index.
//! Nesting depth never reaches the JSON decoder. `DomTree` rebuilds the
//! arena from that list so locator resolution and cleaning can walk parents
//! and siblings without touching the live page. `RawNode` is a nested
//! builder for constructing documents in code.

use crate::error::{RecorderError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type NodeId = usize;

/// One node of a flat document snapshot
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FlatNode {
    /// Index of the parent node; always lower than this node's own index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<usize>,
    /// Element tag; `None` marks a text node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Document as posted by the page hook: nodes in pre-order, root first
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentSnapshot {
    pub nodes: Vec<FlatNode>,
}

/// Nested document builder
#[derive(Debug, Clone, PartialEq)]
pub enum RawNode {
    Text {
        text: String,
    },
    Element {
        tag: String,
        attrs: BTreeMap<String, String>,
        children: Vec<RawNode>,
    },
}

impl RawNode {
    pub fn element(tag: &str) -> Self {
        RawNode::Element {
            tag: tag.to_string(),
            attrs: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn text(text: &str) -> Self {
        RawNode::Text {
            text: text.to_string(),
        }
    }

    /// Builder: set an attribute (no-op on text nodes)
    pub fn attr(mut self, name: &str, value: &str) -> Self {
        if let RawNode::Element { attrs, .. } = &mut self {
            attrs.insert(name.to_string(), value.to_string());
        }
        self
    }

    /// Builder: append a child (no-op on text nodes)
    pub fn child(mut self, node: RawNode) -> Self {
        if let RawNode::Element { children, .. } = &mut self {
            children.push(node);
        }
        self
    }

    /// Flatten into the pre-order wire format the page hook produces
    pub fn flatten(&self) -> DocumentSnapshot {
        let mut nodes = Vec::new();
        let mut stack: Vec<(&RawNode, Option<usize>)> = vec![(self, None)];
        while let Some((raw, parent)) = stack.pop() {
            let index = nodes.len();
            match raw {
                RawNode::Text { text } => nodes.push(FlatNode {
                    parent,
                    text: Some(text.clone()),
                    ..FlatNode::default()
                }),
                RawNode::Element {
                    tag,
                    attrs,
                    children,
                } => {
                    nodes.push(FlatNode {
                        parent,
                        tag: Some(tag.clone()),
                        attrs: attrs.clone(),
                        text: None,
                    });
                    for child in children.iter().rev() {
                        stack.push((child, Some(index)));
                    }
                }
            }
        }
        DocumentSnapshot { nodes }
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Element {
        tag: String,
        attrs: BTreeMap<String, String>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct DomTree {
    nodes: Vec<Node>,
}

impl DomTree {
    /// Build a tree from the hook's flat snapshot; the root must be an element
    /// and every other node must name an earlier element as its parent.
    pub fn from_snapshot(snapshot: &DocumentSnapshot) -> Result<Self> {
        let mut nodes: Vec<Node> = Vec::with_capacity(snapshot.nodes.len());
        for (id, flat) in snapshot.nodes.iter().enumerate() {
            let kind = match &flat.tag {
                Some(tag) => NodeKind::Element {
                    tag: tag.to_ascii_lowercase(),
                    attrs: flat.attrs.clone(),
                },
                None => NodeKind::Text(flat.text.clone().unwrap_or_default()),
            };
            match (id, flat.parent) {
                (0, None) if matches!(kind, NodeKind::Element { .. }) => {}
                (0, None) => {
                    return Err(RecorderError::InvalidSnapshot(
                        "document root is not an element".to_string(),
                    ))
                }
                (0, Some(_)) => {
                    return Err(RecorderError::InvalidSnapshot(
                        "document root has a parent".to_string(),
                    ))
                }
                (_, Some(parent))
                    if parent < id && matches!(nodes[parent].kind, NodeKind::Element { .. }) =>
                {
                    nodes[parent].children.push(id);
                }
                (_, parent) => {
                    return Err(RecorderError::InvalidSnapshot(format!(
                        "node {} has invalid parent {:?}",
                        id, parent
                    )))
                }
            }
            nodes.push(Node {
                kind,
                parent: flat.parent,
                children: Vec::new(),
            });
        }
        if nodes.is_empty() {
            return Err(RecorderError::InvalidSnapshot(
                "document snapshot is empty".to_string(),
            ));
        }
        Ok(DomTree { nodes })
    }

    /// Build a tree from a nested document
    pub fn from_raw(raw: &RawNode) -> Result<Self> {
        Self::from_snapshot(&raw.flatten())
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let snapshot: DocumentSnapshot = serde_json::from_value(value)
            .map_err(|e| RecorderError::InvalidSnapshot(e.to_string()))?;
        Self::from_snapshot(&snapshot)
    }

    pub fn root(&self) -> NodeId {
        0
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id < self.nodes.len()
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.nodes[id].kind, NodeKind::Element { .. })
    }

    /// Lower-case tag name, `None` for text nodes
    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id].kind {
            NodeKind::Element { tag, .. } => Some(tag.as_str()),
            NodeKind::Text(_) => None,
        }
    }

    pub fn attrs(&self, id: NodeId) -> Option<&BTreeMap<String, String>> {
        match &self.nodes[id].kind {
            NodeKind::Element { attrs, .. } => Some(attrs),
            NodeKind::Text(_) => None,
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.attrs(id)
            .and_then(|attrs| attrs.get(name))
            .map(|v| v.as_str())
    }

    /// Attribute value if present and not blank
    pub fn non_empty_attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.attr(id, name).filter(|v| !v.trim().is_empty())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn element_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[id]
            .children
            .iter()
            .copied()
            .filter(move |&c| self.is_element(c))
    }

    /// The node itself if it is an element, else its parent element
    pub fn element_of(&self, id: NodeId) -> Option<NodeId> {
        if self.is_element(id) {
            Some(id)
        } else {
            self.parent(id)
        }
    }

    /// Element siblings that come before `id`
    pub fn preceding_element_siblings(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let siblings: &[NodeId] = match self.parent(id) {
            Some(parent) => &self.nodes[parent].children,
            None => &[],
        };
        siblings
            .iter()
            .copied()
            .take_while(move |&s| s != id)
            .filter(move |&s| self.is_element(s))
    }

    /// Concatenated text of every descendant text node (DOM `textContent`)
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        for node in self.descendants(id) {
            if let NodeKind::Text(text) = &self.nodes[node].kind {
                out.push_str(text);
            }
        }
        out
    }

    /// Pre-order traversal of the subtree rooted at `id` (inclusive)
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            for &child in self.nodes[current].children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Number of element ancestors above `id`
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            depth += 1;
            current = parent;
        }
        depth
    }

    /// The `<body>` element under the root, if any
    pub fn body(&self) -> Option<NodeId> {
        self.element_children(self.root())
            .find(|&c| self.tag(c) == Some("body"))
    }

    /// Resolve an element-index path (as posted by the hook) from the root
    pub fn node_at_path(&self, path: &[usize]) -> Option<NodeId> {
        let mut current = self.root();
        for &index in path {
            current = self.element_children(current).nth(index)?;
        }
        Some(current)
    }

    /// Element-index path from the root to `id`
    pub fn path_of(&self, id: NodeId) -> Vec<usize> {
        let mut path = Vec::new();
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            let index = self.preceding_element_siblings(current).count();
            path.push(index);
            current = parent;
        }
        path.reverse();
        path
    }

    /// First element in document order matching `predicate`
    pub fn find(&self, predicate: impl Fn(NodeId) -> bool) -> Option<NodeId> {
        self.descendants(self.root())
            .into_iter()
            .find(|&id| self.is_element(id) && predicate(id))
    }

    /// Nearest ancestor (exclusive) with the given tag
    pub fn closest_ancestor(&self, id: NodeId, tag: &str) -> Option<NodeId> {
        let mut current = self.parent(id);
        while let Some(node) = current {
            if self.tag(node) == Some(tag) {
                return Some(node);
            }
            current = self.parent(node);
        }
        None
    }
}

/// Truncate to at most `max` characters on a char boundary
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}
