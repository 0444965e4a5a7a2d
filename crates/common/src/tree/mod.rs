//! Document structure trees
//!
//! A [`Tree`] mirrors a document's table of contents: every [`Node`] is a
//! section, subsection or leaf, and `children` keep document order.
//! Trees are built by an external structuring step, validated once when they
//! enter the index, and never patched afterwards.

mod document;

pub use document::decode_tree;

use crate::errors::{AppError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Deepest node level accepted into the index (root is level 0).
///
/// Snapshots are JSON and every level costs two nesting levels, so anything
/// deeper could be written but never read back.
pub const MAX_TREE_DEPTH: usize = 48;

/// One section of a document
///
/// Decoding also accepts the builder spellings `node_id`, `section` and
/// `nodes`. When a node carries both spellings the canonical field wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawNode")]
pub struct Node {
    /// Opaque identifier, unique within its tree when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Raw section content; may be large
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// First page covered by this node
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_index: Option<u32>,

    /// Last page covered by this node
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_index: Option<u32>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

/// Wire shape of a node before spellings are reconciled
#[derive(Deserialize)]
struct RawNode {
    #[serde(default, deserialize_with = "string_or_number")]
    id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    node_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    section: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    start_index: Option<u32>,
    #[serde(default)]
    end_index: Option<u32>,
    #[serde(default, deserialize_with = "null_as_empty")]
    children: Vec<Node>,
    #[serde(default, deserialize_with = "null_as_empty")]
    nodes: Vec<Node>,
}

impl From<RawNode> for Node {
    fn from(raw: RawNode) -> Self {
        Self {
            id: raw.id.or(raw.node_id),
            title: raw.title.or(raw.section),
            summary: raw.summary,
            text: raw.text,
            start_index: raw.start_index,
            end_index: raw.end_index,
            children: if raw.children.is_empty() {
                raw.nodes
            } else {
                raw.children
            },
        }
    }
}

impl Node {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_pages(mut self, start: u32, end: u32) -> Self {
        self.start_index = Some(start);
        self.end_index = Some(end);
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.children.extend(children);
        self
    }

    /// Title, treating an empty string as absent
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref().filter(|t| !t.is_empty())
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref().filter(|s| !s.is_empty())
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Pre-order walk over this node and its descendants
    pub fn iter(&self) -> NodeIter<'_> {
        NodeIter { stack: vec![self] }
    }
}

/// Pre-order iterator over a subtree
pub struct NodeIter<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Iterator for NodeIter<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// A document's structure tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    /// Owning document (filename stem, case preserved)
    pub document_id: String,

    /// Original upload filename
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Document-level description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub root: Node,
}

impl Tree {
    pub fn new(document_id: impl Into<String>, root: Node) -> Self {
        Self {
            document_id: document_id.into(),
            source: None,
            description: None,
            root,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Display name for listings: the upload filename, else the id
    pub fn filename(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.document_id)
    }

    pub fn node_count(&self) -> usize {
        self.root.iter().count()
    }

    /// Number of levels below the root (0 for a lone root)
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(&self.root, 0usize)];
        while let Some((node, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            stack.extend(node.children.iter().map(|child| (child, depth + 1)));
        }
        deepest
    }

    /// True when no node carries a title, summary or text
    pub fn is_blank(&self) -> bool {
        self.root
            .iter()
            .all(|n| n.title().is_none() && n.summary().is_none() && n.text().is_none())
    }

    /// Check the invariants a tree must hold before it is indexed
    pub fn validate(&self) -> Result<()> {
        validate(self)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Validate a tree: non-empty document id, ids unique where supplied, depth bounded.
///
/// Children are owned, so every node is reachable from the root exactly once
/// and cycles cannot be expressed.
pub fn validate(tree: &Tree) -> Result<()> {
    if tree.document_id.trim().is_empty() {
        return Err(AppError::InvalidTree {
            message: "document id is empty".to_string(),
        });
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut stack = vec![(&tree.root, 0usize)];

    while let Some((node, depth)) = stack.pop() {
        if depth > MAX_TREE_DEPTH {
            return Err(AppError::InvalidTree {
                message: format!(
                    "tree for {} is deeper than {} levels",
                    tree.document_id, MAX_TREE_DEPTH
                ),
            });
        }

        if let Some(id) = node.id.as_deref() {
            if !seen.insert(id) {
                return Err(AppError::InvalidTree {
                    message: format!("duplicate node id '{}' in {}", id, tree.document_id),
                });
            }
        }

        stack.extend(node.children.iter().map(|child| (child, depth + 1)));
    }

    Ok(())
}

/// Derive a document id from an upload filename: the stem, case preserved.
pub fn document_id_from_filename(filename: &str) -> String {
    let name = Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());

    Path::new(&name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or(name)
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<Node>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Node>>::deserialize(deserializer)?.unwrap_or_default())
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<RawId>::deserialize(deserializer)?.map(|raw| match raw {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    }))
}
