//! Lenient decoding of builder output and snapshots
//!
//! Structuring services do not agree on an envelope. We accept our own
//! snapshot shape, the `{doc_name, doc_description, structure}` shape, a
//! bare list of top-level sections, or a single node.

use super::{Node, Tree};
use crate::errors::{AppError, Result};
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(untagged)]
enum TreeDocument {
    Snapshot(SnapshotDocument),
    Structure(StructureDocument),
    Forest(Vec<Node>),
    Root(Node),
}

#[derive(Deserialize)]
struct SnapshotDocument {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    description: Option<String>,
    root: Node,
}

#[derive(Deserialize)]
struct StructureDocument {
    #[serde(default)]
    doc_name: Option<String>,
    #[serde(default)]
    doc_description: Option<String>,
    structure: StructureBody,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StructureBody {
    Sections(Vec<Node>),
    Single(Node),
}

/// Decode a tree for `document_id` from any accepted JSON shape.
///
/// The caller's id always wins over anything embedded in the document, so a
/// snapshot is keyed by its filename.
pub fn decode_tree(document_id: &str, value: serde_json::Value) -> Result<Tree> {
    let document: TreeDocument =
        serde_json::from_value(value).map_err(|e| AppError::InvalidTree {
            message: format!("unrecognised tree document for {}: {}", document_id, e),
        })?;

    let tree = match document {
        TreeDocument::Snapshot(snapshot) => Tree {
            document_id: document_id.to_string(),
            source: snapshot.source,
            description: snapshot.description,
            root: snapshot.root,
        },
        TreeDocument::Structure(doc) => {
            let root = match doc.structure {
                StructureBody::Single(node) if doc.doc_name.is_none() => node,
                StructureBody::Single(node) => Node {
                    title: doc.doc_name,
                    children: vec![node],
                    ..Default::default()
                },
                StructureBody::Sections(sections) => Node {
                    title: doc.doc_name,
                    children: sections,
                    ..Default::default()
                },
            };
            Tree {
                document_id: document_id.to_string(),
                source: None,
                description: doc.doc_description,
                root,
            }
        }
        TreeDocument::Forest(sections) => Tree::new(
            document_id,
            Node {
                children: sections,
                ..Default::default()
            },
        ),
        TreeDocument::Root(node) => Tree::new(document_id, node),
    };

    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decodes_snapshot_shape_with_caller_id() {
        let tree = decode_tree(
            "report",
            json!({
                "document_id": "stale-name",
                "source": "report.pdf",
                "root": { "title": "Report", "children": [{ "title": "Intro" }] }
            }),
        )
        .unwrap();
        assert_eq!(tree.document_id, "report");
        assert_eq!(tree.source.as_deref(), Some("report.pdf"));
        assert_eq!(tree.root.children.len(), 1);
    }

    #[test]
    fn test_decodes_structure_document() {
        let tree = decode_tree(
            "paper",
            json!({
                "doc_name": "paper.pdf",
                "doc_description": "A study of trees",
                "structure": [
                    { "title": "Abstract", "node_id": "0000", "start_index": 1, "end_index": 1 },
                    { "title": "Body", "node_id": "0001", "nodes": [
                        { "title": "Method", "node_id": "0002" }
                    ]}
                ]
            }),
        )
        .unwrap();

        assert_eq!(tree.root.title(), Some("paper.pdf"));
        assert_eq!(tree.description.as_deref(), Some("A study of trees"));
        assert_eq!(tree.root.children.len(), 2);
        assert_eq!(tree.root.children[0].start_index, Some(1));
        assert_eq!(tree.root.children[1].children[0].id.as_deref(), Some("0002"));
    }

    #[test]
    fn test_decodes_bare_section_list() {
        let tree = decode_tree("notes", json!([{ "title": "A" }, { "title": "B" }])).unwrap();
        assert!(tree.root.title().is_none());
        assert_eq!(tree.root.children.len(), 2);
    }

    #[test]
    fn test_decodes_bare_node() {
        let tree = decode_tree("intro", json!({ "title": "Intro" })).unwrap();
        assert_eq!(tree.root, Node::titled("Intro"));
    }

    #[test]
    fn test_rejects_non_object() {
        let err = decode_tree("bad", json!("just a string")).unwrap_err();
        assert!(matches!(err, AppError::InvalidTree { .. }));
    }
}
