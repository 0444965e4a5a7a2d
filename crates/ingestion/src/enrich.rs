//! Post-build enrichment for locally built trees
//!
//! Runs in a fixed order: summaries (which need the node text), document
//! description, node ids, then text stripping. Completion failures are
//! logged and leave the field absent; they never fail the build.

use crate::builder::BuildOptions;
use crate::pdf::estimate_tokens;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};
use treerag_common::llm::{CompletionPurpose, CompletionRequest, CompletionService, TEXT_MARKER};
use treerag_common::tree::{Node, Tree};

/// Summaries requested at once
const SUMMARY_CONCURRENCY: usize = 4;

/// Titles included in the description prompt
const OUTLINE_LIMIT: usize = 200;

const SUMMARY_SYSTEM_PROMPT: &str = "You summarize sections of a document. \
Reply with a short description of the main points covered by the given text.";

const DESCRIPTION_SYSTEM_PROMPT: &str = "You describe documents. Given a document's \
section outline, reply with a one-sentence description that distinguishes it from \
other documents.";

/// Adds ids, summaries and a description to a built tree
#[derive(Clone)]
pub struct Enricher {
    completion: Arc<dyn CompletionService>,
}

impl Enricher {
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self { completion }
    }

    pub async fn enrich(&self, mut tree: Tree, options: &BuildOptions) -> Tree {
        if options.add_node_summary {
            self.add_summaries(&mut tree.root, options.summary_token_threshold)
                .await;
        }
        if options.add_doc_description && tree.description.is_none() {
            tree.description = self.describe(&tree).await;
        }
        if options.add_node_id {
            assign_ids(&mut tree.root);
        }
        if !options.add_node_text {
            for_each_node_mut(&mut tree.root, |node| node.text = None);
        }
        tree
    }

    async fn add_summaries(&self, root: &mut Node, threshold: usize) {
        // computed in pre-order, then written back in the same order
        let pending: Vec<Option<Section>> = root.iter().map(Section::needing_summary).collect();
        let summaries: Vec<Option<String>> = stream::iter(pending)
            .map(|section| {
                let completion = Arc::clone(&self.completion);
                async move {
                    match section {
                        Some(section) => section.summarize(completion.as_ref(), threshold).await,
                        None => None,
                    }
                }
            })
            .buffered(SUMMARY_CONCURRENCY)
            .collect()
            .await;

        let mut summaries = summaries.into_iter();
        for_each_node_mut(root, |node| {
            if let Some(Some(summary)) = summaries.next() {
                node.summary = Some(summary);
            }
        });
    }

    async fn describe(&self, tree: &Tree) -> Option<String> {
        let outline = tree
            .root
            .iter()
            .filter_map(|node| node.title())
            .take(OUTLINE_LIMIT)
            .collect::<Vec<_>>()
            .join("\n");
        if outline.is_empty() {
            return None;
        }

        let request = CompletionRequest::new(
            CompletionPurpose::Description,
            DESCRIPTION_SYSTEM_PROMPT,
            format!("Document: {}\n\n{}{}", tree.filename(), TEXT_MARKER, outline),
        );
        match self.completion.complete(&request).await {
            Ok(description) if !description.trim().is_empty() => {
                debug!(document_id = %tree.document_id, "Document description generated");
                Some(description.trim().to_string())
            }
            Ok(_) => None,
            Err(e) => {
                warn!(document_id = %tree.document_id, error = %e, "Description generation failed");
                None
            }
        }
    }
}

/// Owned copy of a node that still lacks a summary
struct Section {
    title: Option<String>,
    text: String,
}

impl Section {
    fn needing_summary(node: &Node) -> Option<Self> {
        if node.summary().is_some() {
            return None;
        }
        Some(Self {
            title: node.title().map(str::to_string),
            text: node.text()?.to_string(),
        })
    }

    async fn summarize(self, completion: &dyn CompletionService, threshold: usize) -> Option<String> {
        if estimate_tokens(&self.text) < threshold {
            return Some(self.text.trim().to_string());
        }

        let title = self.title.as_deref().unwrap_or("(untitled)");
        let request = CompletionRequest::new(
            CompletionPurpose::Summary,
            SUMMARY_SYSTEM_PROMPT,
            format!("Section: {}\n\n{}{}", title, TEXT_MARKER, self.text),
        );
        match completion.complete(&request).await {
            Ok(summary) if !summary.trim().is_empty() => Some(summary.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                warn!(title = %title, error = %e, "Summary generation failed");
                None
            }
        }
    }
}

/// Number nodes in pre-order as zero-padded four-digit ids
pub fn assign_ids(root: &mut Node) {
    let mut next = 0usize;
    for_each_node_mut(root, |node| {
        node.id = Some(format!("{:04}", next));
        next += 1;
    });
}

/// Visit every node in pre-order
fn for_each_node_mut(root: &mut Node, mut visit: impl FnMut(&mut Node)) {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        visit(node);
        stack.extend(node.children.iter_mut().rev());
    }
}
