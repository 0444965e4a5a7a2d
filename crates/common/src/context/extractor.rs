//! Depth-bounded context extraction
//!
//! Walks a (sub)tree in document order and renders each node as up to three
//! fragments: a `## title` header line, a `Summary:` line, and the raw text
//! when it is short enough. Nodes at or beyond the depth limit are not
//! visited, and over-long text is dropped rather than cut.

use crate::tree::Node;
use std::borrow::Cow;
use std::collections::VecDeque;

/// Text at or above this many characters is left out of the context
pub const DEFAULT_TEXT_INCLUSION_THRESHOLD: usize = 5000;

/// Separator between fragments in an extracted context
pub const FRAGMENT_SEPARATOR: &str = "\n";

/// Renders trees into context text
#[derive(Debug, Clone, Copy)]
pub struct ContextExtractor {
    text_inclusion_threshold: usize,
}

impl Default for ContextExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_TEXT_INCLUSION_THRESHOLD)
    }
}

impl ContextExtractor {
    pub fn new(text_inclusion_threshold: usize) -> Self {
        Self {
            text_inclusion_threshold,
        }
    }

    pub fn text_inclusion_threshold(&self) -> usize {
        self.text_inclusion_threshold
    }

    /// Lazily yield the fragments of `node`'s subtree, starting at `current_depth`
    pub fn fragments<'a>(
        &self,
        node: &'a Node,
        max_depth: usize,
        current_depth: usize,
    ) -> ContextFragments<'a> {
        ContextFragments {
            stack: vec![(node, current_depth)],
            pending: VecDeque::with_capacity(3),
            max_depth,
            text_inclusion_threshold: self.text_inclusion_threshold,
        }
    }

    /// Extract the context of a whole (sub)tree rooted at depth 0
    pub fn extract(&self, node: &Node, max_depth: usize) -> String {
        self.extract_from(node, max_depth, 0)
    }

    /// Extract with an explicit starting depth; empty once `current_depth >= max_depth`
    pub fn extract_from(&self, node: &Node, max_depth: usize, current_depth: usize) -> String {
        let mut out = String::new();
        for (i, fragment) in self
            .fragments(node, max_depth, current_depth)
            .enumerate()
        {
            if i > 0 {
                out.push_str(FRAGMENT_SEPARATOR);
            }
            out.push_str(&fragment);
        }
        out
    }
}

/// Extract with the default text threshold
pub fn extract(node: &Node, max_depth: usize, current_depth: usize) -> String {
    ContextExtractor::default().extract_from(node, max_depth, current_depth)
}

/// Pre-order fragment stream over a subtree.
///
/// Each stack entry carries its own depth, so the walk needs no recursion and
/// stops descending at the limit. Consumed once; build a new one to restart.
pub struct ContextFragments<'a> {
    stack: Vec<(&'a Node, usize)>,
    pending: VecDeque<Cow<'a, str>>,
    max_depth: usize,
    text_inclusion_threshold: usize,
}

impl<'a> ContextFragments<'a> {
    fn render(&mut self, node: &'a Node) {
        if let Some(title) = node.title() {
            self.pending.push_back(Cow::Owned(format!("\n## {}", title)));
        }
        if let Some(summary) = node.summary() {
            self.pending.push_back(Cow::Owned(format!("Summary: {}", summary)));
        }
        if let Some(text) = node.text() {
            if shorter_than(text, self.text_inclusion_threshold) {
                self.pending.push_back(Cow::Borrowed(text));
            }
        }
    }
}

impl<'a> Iterator for ContextFragments<'a> {
    type Item = Cow<'a, str>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(fragment) = self.pending.pop_front() {
                return Some(fragment);
            }

            let (node, depth) = self.stack.pop()?;
            if depth >= self.max_depth {
                continue;
            }

            self.render(node);
            self.stack
                .extend(node.children.iter().rev().map(|child| (child, depth + 1)));
        }
    }
}

/// `text` has fewer than `limit` characters
fn shorter_than(text: &str, limit: usize) -> bool {
    limit > 0 && text.chars().nth(limit - 1).is_none()
}
