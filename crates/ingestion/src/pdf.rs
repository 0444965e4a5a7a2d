//! PDF structure extraction
//!
//! Extracts page text with lopdf and groups consecutive pages into nodes of
//! at most `max_page_num_each_node` pages, closing a group early once it
//! would exceed `max_token_num_each_node` estimated tokens.

use crate::builder::{BuildOptions, SourceDocument, TreeBuilder};
use crate::errors::IngestionError;
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, warn};
use treerag_common::tree::{Node, Tree};

/// Local builder for `.pdf` uploads
#[derive(Debug, Default, Clone)]
pub struct PdfBuilder;

impl PdfBuilder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TreeBuilder for PdfBuilder {
    async fn build(
        &self,
        source: &SourceDocument,
        options: &BuildOptions,
    ) -> Result<Tree, IngestionError> {
        let path = source.path.clone();
        let pages = tokio::task::spawn_blocking(move || extract_pages(&path)).await??;

        let root = Node::titled(source.document_id.clone()).with_children(group_pages(
            &pages,
            options.max_page_num_each_node,
            options.max_token_num_each_node,
        ));

        Ok(Tree::new(source.document_id.clone(), root).with_source(source.filename.clone()))
    }

    fn name(&self) -> &'static str {
        "pdf"
    }
}

/// Text of every page, in page order; unreadable pages are empty
pub fn extract_pages(path: &Path) -> Result<Vec<String>, IngestionError> {
    let doc = lopdf::Document::load(path).map_err(|e| IngestionError::PdfParseError {
        path: path.display().to_string(),
        message: format!("Failed to load PDF: {}", e),
    })?;

    let pages = doc.get_pages();
    debug!(page_count = pages.len(), "Extracting text from PDF");

    let mut texts = Vec::with_capacity(pages.len());
    for (page_num, page_id) in pages {
        match doc.get_page_content(page_id) {
            Ok(content) => texts.push(clean_text(&extract_text_from_content(&content))),
            Err(e) => {
                warn!(page = page_num, error = %e, "Failed to extract text from page, skipping");
                texts.push(String::new());
            }
        }
    }

    if texts.iter().all(|t| t.trim().is_empty()) {
        return Err(IngestionError::EmptyDocument {
            path: path.display().to_string(),
        });
    }

    Ok(texts)
}

/// Rough token count used for grouping (about four characters per token)
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Group pages (1-based) into nodes carrying their page span
fn group_pages(pages: &[String], max_pages: usize, max_tokens: usize) -> Vec<Node> {
    let max_pages = max_pages.max(1);
    let mut nodes = Vec::new();
    let mut start = 0usize;

    while start < pages.len() {
        let mut end = start + 1;
        let mut tokens = estimate_tokens(&pages[start]);
        while end < pages.len() && end - start < max_pages {
            let next = estimate_tokens(&pages[end]);
            if tokens + next > max_tokens {
                break;
            }
            tokens += next;
            end += 1;
        }

        let text = pages[start..end]
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        // page numbers fit in u32 for any PDF lopdf can load
        let (first, last) = (start as u32 + 1, end as u32);
        let title = if first == last {
            format!("Page {}", first)
        } else {
            format!("Pages {}-{}", first, last)
        };

        let mut node = Node::titled(title).with_pages(first, last);
        if !text.is_empty() {
            node.text = Some(text);
        }
        nodes.push(node);
        start = end;
    }

    nodes
}

/// Extract text from PDF content stream
fn extract_text_from_content(content: &[u8]) -> String {
    // Simple text extraction - looks for text between BT and ET operators
    let content_str = String::from_utf8_lossy(content);
    let mut text = String::new();
    let mut in_text_block = false;
    let mut current_text = String::new();

    for line in content_str.lines() {
        let trimmed = line.trim();

        if trimmed == "BT" {
            in_text_block = true;
            continue;
        }

        if trimmed == "ET" {
            in_text_block = false;
            if !current_text.is_empty() {
                text.push_str(&current_text);
                text.push(' ');
                current_text.clear();
            }
            continue;
        }

        if in_text_block {
            if let Some(text_content) = extract_text_from_operator(trimmed) {
                current_text.push_str(&text_content);
            }
        }
    }

    text
}

/// Text shown by a `Tj`, `'`, `"` or `TJ` operator line
fn extract_text_from_operator(line: &str) -> Option<String> {
    if line.ends_with("Tj") || line.ends_with('\'') || line.ends_with('"') {
        if let (Some(start), Some(end)) = (line.find('('), line.rfind(')')) {
            if start < end {
                return Some(decode_pdf_string(&line[start + 1..end]));
            }
        }
    }

    // [(text) num (text) num] TJ
    if line.ends_with("TJ") {
        let mut result = String::new();
        let mut in_paren = false;
        let mut current = String::new();

        for ch in line.chars() {
            match ch {
                '(' => in_paren = true,
                ')' => {
                    in_paren = false;
                    result.push_str(&decode_pdf_string(&current));
                    current.clear();
                }
                _ if in_paren => current.push(ch),
                _ => {}
            }
        }

        if !result.is_empty() {
            return Some(result);
        }
    }

    None
}

/// Decode PDF string escapes
fn decode_pdf_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some(c) => result.push(c),
                None => {}
            }
        } else {
            result.push(ch);
        }
    }

    result
}

/// Collapse whitespace, drop BOMs and normalize curly quotes
fn clean_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{FEFF}', "")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::DocumentKind;
    use lopdf::{dictionary, Document, Object, Stream};

    fn write_pdf(path: &Path, pages: &[&str]) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for text in pages {
            let content = format!("BT\n/F1 12 Tf\n72 720 Td\n({}) Tj\nET\n", text);
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("Hello   World\n\nTest"), "Hello World Test");
        assert_eq!(clean_text("\u{201C}quoted\u{201D} it\u{2019}s"), "\"quoted\" it's");
    }

    #[test]
    fn test_decode_pdf_string() {
        assert_eq!(decode_pdf_string("Hello\\nWorld"), "Hello\nWorld");
        assert_eq!(decode_pdf_string("Test\\(paren\\)"), "Test(paren)");
    }

    #[test]
    fn test_operator_forms() {
        assert_eq!(extract_text_from_operator("(Hi) Tj").as_deref(), Some("Hi"));
        assert_eq!(
            extract_text_from_operator("[(Hel) -20 (lo)] TJ").as_deref(),
            Some("Hello")
        );
        assert_eq!(extract_text_from_operator("72 720 Td"), None);
    }

    #[test]
    fn test_group_pages_by_count() {
        let pages: Vec<String> = (1..=5).map(|i| format!("page {}", i)).collect();
        let nodes = group_pages(&pages, 2, 20_000);

        let titles: Vec<_> = nodes.iter().map(|n| n.title.clone().unwrap()).collect();
        assert_eq!(titles, vec!["Pages 1-2", "Pages 3-4", "Page 5"]);
        assert_eq!(nodes[1].start_index, Some(3));
        assert_eq!(nodes[1].end_index, Some(4));
        assert_eq!(nodes[0].text.as_deref(), Some("page 1\n\npage 2"));
    }

    #[test]
    fn test_group_pages_closes_early_on_tokens() {
        let pages = vec!["x".repeat(40), "y".repeat(40), "z".repeat(4)];
        let nodes = group_pages(&pages, 10, 15);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].end_index, Some(1));
        assert_eq!(nodes[1].start_index, Some(2));
        assert_eq!(nodes[1].end_index, Some(3));
    }

    #[test]
    fn test_blank_pages_keep_their_slot() {
        let pages = vec![String::new(), "text".to_string()];
        let nodes = group_pages(&pages, 1, 100);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].text, None);
        assert_eq!(nodes[1].title.as_deref(), Some("Page 2"));
    }

    #[tokio::test]
    async fn test_build_from_generated_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        write_pdf(&path, &["Revenue grew", "Costs fell", "Outlook stable"]);

        let source = SourceDocument {
            document_id: "report".into(),
            filename: "report.pdf".into(),
            path,
            kind: DocumentKind::Pdf,
        };
        let options = BuildOptions {
            max_page_num_each_node: 2,
            ..BuildOptions::default()
        };
        let tree = PdfBuilder::new().build(&source, &options).await.unwrap();

        assert_eq!(tree.root.title.as_deref(), Some("report"));
        assert_eq!(tree.root.children.len(), 2);
        let first = tree.root.children[0].text.as_deref().unwrap();
        assert!(first.contains("Revenue grew"));
        assert!(first.contains("Costs fell"));
        assert_eq!(tree.root.children[1].start_index, Some(3));
    }

    #[tokio::test]
    async fn test_garbage_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        tokio::fs::write(&path, b"not a pdf").await.unwrap();

        let err = tokio::task::spawn_blocking(move || extract_pages(&path))
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, IngestionError::PdfParseError { .. }));
    }
}
