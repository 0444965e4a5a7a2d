//! Markdown structure extraction
//!
//! Headings become nodes nested by level; the text between a heading and the
//! next one is that node's text. Anything before the first heading belongs
//! to the root, which is titled after the document.

use crate::builder::{BuildOptions, SourceDocument, TreeBuilder};
use crate::errors::IngestionError;
use async_trait::async_trait;
use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use std::ops::Range;
use tracing::debug;
use treerag_common::tree::{Node, Tree};

/// Local builder for `.md` / `.markdown` uploads
#[derive(Debug, Default, Clone)]
pub struct MarkdownBuilder;

impl MarkdownBuilder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TreeBuilder for MarkdownBuilder {
    async fn build(
        &self,
        source: &SourceDocument,
        _options: &BuildOptions,
    ) -> Result<Tree, IngestionError> {
        let bytes = tokio::fs::read(&source.path).await?;
        let text = String::from_utf8_lossy(&bytes);
        if text.trim().is_empty() {
            return Err(IngestionError::EmptyDocument {
                path: source.path.display().to_string(),
            });
        }

        let root = parse_markdown(&source.document_id, &text);
        debug!(
            document_id = %source.document_id,
            sections = root.iter().count() - 1,
            "Markdown structure extracted"
        );
        Ok(Tree::new(source.document_id.clone(), root).with_source(source.filename.clone()))
    }

    fn name(&self) -> &'static str {
        "markdown"
    }
}

struct Heading {
    level: usize,
    title: String,
    span: Range<usize>,
}

fn headings(source: &str) -> Vec<Heading> {
    let mut found = Vec::new();
    let mut current: Option<Heading> = None;

    let options = Options::ENABLE_TABLES | Options::ENABLE_HEADING_ATTRIBUTES;
    for (event, range) in Parser::new_ext(source, options).into_offset_iter() {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                current = Some(Heading {
                    level: level as usize,
                    title: String::new(),
                    span: range,
                });
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some(heading) = current.as_mut() {
                    heading.title.push_str(&text);
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if let Some(heading) = current.as_mut() {
                    heading.title.push(' ');
                }
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some(mut heading) = current.take() {
                    heading.title = heading.title.trim().to_string();
                    found.push(heading);
                }
            }
            _ => {}
        }
    }

    found
}

fn body(source: &str, range: Range<usize>) -> Option<String> {
    let text = source.get(range)?.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Parse Markdown into a section tree rooted at a node titled `title`
pub fn parse_markdown(title: &str, source: &str) -> Node {
    let headings = headings(source);

    let mut root = Node::titled(title);
    let preamble_end = headings.first().map_or(source.len(), |h| h.span.start);
    root.text = body(source, 0..preamble_end);

    // open sections, innermost last
    let mut open: Vec<(usize, Node)> = Vec::new();

    for (i, heading) in headings.iter().enumerate() {
        while open.last().is_some_and(|(level, _)| *level >= heading.level) {
            close_section(&mut open, &mut root);
        }

        let body_end = headings.get(i + 1).map_or(source.len(), |h| h.span.start);
        let mut node = Node::titled(heading.title.clone());
        node.text = body(source, heading.span.end..body_end);
        open.push((heading.level, node));
    }

    while !open.is_empty() {
        close_section(&mut open, &mut root);
    }

    root
}

fn close_section(open: &mut Vec<(usize, Node)>, root: &mut Node) {
    if let Some((_, node)) = open.pop() {
        match open.last_mut() {
            Some((_, parent)) => parent.children.push(node),
            None => root.children.push(node),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::DocumentKind;

    const GUIDE: &str = "Welcome text.\n\n\
# Install\n\nRun the installer.\n\n\
## Linux\n\nUse the package.\n\n\
## Windows\n\nUse the MSI.\n\n\
# Configure `app.toml`\n\nEdit the file.\n\n\
### Deep\n\nSkipped a level.\n";

    fn titles(node: &Node) -> Vec<String> {
        node.children
            .iter()
            .map(|c| c.title.clone().unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_heading_hierarchy() {
        let root = parse_markdown("guide", GUIDE);

        assert_eq!(root.title.as_deref(), Some("guide"));
        assert_eq!(root.text.as_deref(), Some("Welcome text."));
        assert_eq!(titles(&root), vec!["Install", "Configure app.toml"]);

        let install = &root.children[0];
        assert_eq!(install.text.as_deref(), Some("Run the installer."));
        assert_eq!(titles(install), vec!["Linux", "Windows"]);
        assert_eq!(install.children[1].text.as_deref(), Some("Use the MSI."));

        let configure = &root.children[1];
        assert_eq!(titles(configure), vec!["Deep"]);
        assert_eq!(configure.children[0].text.as_deref(), Some("Skipped a level."));
    }

    #[test]
    fn test_no_headings_keeps_text_on_root() {
        let root = parse_markdown("plain", "Just a paragraph.");
        assert!(root.children.is_empty());
        assert_eq!(root.text.as_deref(), Some("Just a paragraph."));
    }

    #[test]
    fn test_headings_in_code_blocks_are_ignored() {
        let source = "# Real\n\n```\n# not a heading\n```\n";
        let root = parse_markdown("doc", source);
        assert_eq!(titles(&root), vec!["Real"]);
        assert!(root.children[0].text.as_deref().unwrap().contains("# not a heading"));
    }

    #[test]
    fn test_empty_sections_have_no_text() {
        let root = parse_markdown("doc", "# A\n# B\nbody\n");
        assert_eq!(root.text, None);
        assert_eq!(root.children[0].text, None);
        assert_eq!(root.children[1].text.as_deref(), Some("body"));
    }

    #[tokio::test]
    async fn test_build_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guide.md");
        tokio::fs::write(&path, GUIDE).await.unwrap();

        let source = SourceDocument {
            document_id: "guide".into(),
            filename: "guide.md".into(),
            path,
            kind: DocumentKind::Markdown,
        };
        let tree = MarkdownBuilder::new()
            .build(&source, &BuildOptions::default())
            .await
            .unwrap();

        assert_eq!(tree.document_id, "guide");
        assert_eq!(tree.filename(), "guide.md");
        assert_eq!(tree.node_count(), 6);
        assert!(tree.validate().is_ok());
    }

    #[tokio::test]
    async fn test_blank_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.md");
        tokio::fs::write(&path, "  \n\n").await.unwrap();

        let source = SourceDocument {
            document_id: "blank".into(),
            filename: "blank.md".into(),
            path,
            kind: DocumentKind::Markdown,
        };
        let err = MarkdownBuilder::new()
            .build(&source, &BuildOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestionError::EmptyDocument { .. }));
    }
}
