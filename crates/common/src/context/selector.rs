//! Relevance selection over a single document tree
//!
//! The model is shown a capped JSON rendering of the tree and asked which
//! sections matter for the query. Its reply is advisory: it is parsed and
//! logged, but the context handed back is always a structural extraction
//! of the whole tree. When the call succeeds the extraction goes
//! [`SelectorConfig::primary_depth`] levels deep; when it fails the
//! shallower [`SelectorConfig::fallback_depth`] is used.

use super::extractor::ContextExtractor;
use crate::config::RetrievalConfig;
use crate::llm::{CompletionPurpose, CompletionRequest, CompletionService};
use crate::metrics;
use crate::tree::Tree;
use regex_lite::Regex;
use serde_json::Value;
use std::sync::{Arc, OnceLock};

const SELECTION_SYSTEM_PROMPT: &str = "You are an expert at navigating document structures. \
Given a hierarchical outline of a document and a user query, identify the sections most \
likely to contain the answer.";

/// Tuning for [`RelevanceSelector`]
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    pub primary_depth: usize,
    pub fallback_depth: usize,
    pub text_inclusion_threshold: usize,
    pub structure_char_cap: usize,
    pub top_k: usize,
    pub temperature: f32,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

impl From<&RetrievalConfig> for SelectorConfig {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            primary_depth: config.primary_depth,
            fallback_depth: config.fallback_depth,
            text_inclusion_threshold: config.text_inclusion_threshold,
            structure_char_cap: config.structure_char_cap,
            top_k: config.top_k,
            temperature: config.selection_temperature,
        }
    }
}

/// Outcome of selecting context from one tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    /// Non-empty context fragments, at most `top_k`
    pub fragments: Vec<String>,
    /// Section references the model suggested; informational only
    pub advisory: Vec<String>,
    /// The reasoning call failed and the shallow extraction was used
    pub fell_back: bool,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

/// Picks context fragments out of a tree for a query
#[derive(Clone)]
pub struct RelevanceSelector {
    completion: Arc<dyn CompletionService>,
    extractor: ContextExtractor,
    config: SelectorConfig,
}

impl RelevanceSelector {
    pub fn new(completion: Arc<dyn CompletionService>, config: SelectorConfig) -> Self {
        Self {
            completion,
            extractor: ContextExtractor::new(config.text_inclusion_threshold),
            config,
        }
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// Select context for `query`. Never fails: a failed reasoning call
    /// degrades to the fallback extraction.
    pub async fn select(&self, tree: &Tree, query: &str) -> Selection {
        let request = CompletionRequest::new(
            CompletionPurpose::Selection,
            SELECTION_SYSTEM_PROMPT,
            self.selection_prompt(tree, query),
        )
        .temperature(self.config.temperature);

        let (depth, advisory, fell_back) = match self.completion.complete(&request).await {
            Ok(reply) => {
                let advisory = parse_references(&reply, self.config.top_k);
                tracing::debug!(
                    document_id = %tree.document_id,
                    references = ?advisory,
                    "Reasoning call suggested sections"
                );
                (self.config.primary_depth, advisory, false)
            }
            Err(e) => {
                tracing::warn!(
                    document_id = %tree.document_id,
                    error = %e,
                    "Reasoning call failed, using structural fallback"
                );
                metrics::record_selection_fallback();
                (self.config.fallback_depth, Vec::new(), true)
            }
        };

        let context = self.extractor.extract(&tree.root, depth);
        let mut fragments: Vec<String> = std::iter::once(context)
            .filter(|fragment| !fragment.trim().is_empty())
            .collect();
        fragments.truncate(self.config.top_k);

        Selection {
            fragments,
            advisory,
            fell_back,
        }
    }

    fn selection_prompt(&self, tree: &Tree, query: &str) -> String {
        format!(
            "Document Structure:\n{}\n\nUser Query: {}\n\n\
            Identify the most relevant sections (up to {}) that would help answer this query. \
            Return them as a JSON list of node ids or section titles.",
            self.structure_outline(tree),
            query,
            self.config.top_k
        )
    }

    /// Pretty JSON of the tree, cut to the configured number of characters
    fn structure_outline(&self, tree: &Tree) -> String {
        let json = match tree.to_json_pretty() {
            Ok(json) => json,
            Err(e) => {
                tracing::debug!(error = %e, "Could not render tree outline");
                return String::new();
            }
        };
        truncate_chars(&json, self.config.structure_char_cap).to_string()
    }
}

/// Longest prefix of `s` with at most `max_chars` characters
fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte, _)) => &s[..byte],
        None => s,
    }
}

fn quoted_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#""([^"\\]{1,200})""#).ok())
        .as_ref()
}

/// Pull section references out of a model reply.
///
/// Accepts a JSON array anywhere in the reply (possibly inside a code fence)
/// of strings, numbers, or objects with an id or title; otherwise falls back
/// to the quoted strings in the text.
fn parse_references(reply: &str, limit: usize) -> Vec<String> {
    let from_json = match (reply.find('['), reply.rfind(']')) {
        (Some(start), Some(end)) if start < end => {
            serde_json::from_str::<Vec<Value>>(&reply[start..=end]).ok()
        }
        _ => None,
    };

    let references: Vec<String> = match from_json {
        Some(values) => values.iter().filter_map(reference_of).collect(),
        None => quoted_pattern()
            .map(|re| {
                re.captures_iter(reply)
                    .filter_map(|caps| caps.get(1))
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default(),
    };

    references.into_iter().take(limit).collect()
}

fn reference_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => ["node_id", "id", "title", "section"]
            .iter()
            .find_map(|key| map.get(*key).and_then(reference_of)),
        _ => None,
    }
}
