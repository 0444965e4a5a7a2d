//! Question answering across indexed documents
//!
//! `ask` runs in three phases: resolve the target documents, select context
//! from each tree concurrently, then synthesize one answer from the merged
//! context. Documents that are not indexed are skipped; a synthesis failure
//! is returned to the caller as is.

use super::selector::{RelevanceSelector, Selection, SelectorConfig};
use crate::config::RetrievalConfig;
use crate::errors::{AppError, Result};
use crate::index::IndexStore;
use crate::llm::{CompletionPurpose, CompletionRequest, CompletionService};
use crate::metrics;
use crate::tree::Tree;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Separator between per-document contexts in the merged prompt
pub const DOCUMENT_SEPARATOR: &str = "\n\n---\n\n";

const SYNTHESIS_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions \
based on the provided document context. Each document's context starts with a \
[Document: <id>] header. Cite the specific sections or documents your answer relies on \
whenever possible.";

/// Answer to a question, with the documents that were consulted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub question: String,
    pub answer: String,
    /// Ids of the documents that were queried, in request order
    pub sources: Vec<String>,
}

/// Progress marker for `ask`, used in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AskPhase {
    Resolving,
    Extracting,
    Synthesizing,
    Done,
}

impl AskPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AskPhase::Resolving => "resolving",
            AskPhase::Extracting => "extracting",
            AskPhase::Synthesizing => "synthesizing",
            AskPhase::Done => "done",
        }
    }
}

/// Context selected from one document
#[derive(Debug, Clone)]
struct DocumentContext {
    document_id: String,
    selection: Selection,
}

/// Answers questions over the trees in an [`IndexStore`]
#[derive(Clone)]
pub struct QueryOrchestrator {
    store: IndexStore,
    selector: RelevanceSelector,
    completion: Arc<dyn CompletionService>,
    synthesis_temperature: f32,
}

impl QueryOrchestrator {
    pub fn new(
        store: IndexStore,
        completion: Arc<dyn CompletionService>,
        retrieval: &RetrievalConfig,
    ) -> Self {
        Self {
            store,
            selector: RelevanceSelector::new(
                Arc::clone(&completion),
                SelectorConfig::from(retrieval),
            ),
            completion,
            synthesis_temperature: retrieval.synthesis_temperature,
        }
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Answer `question` from the given documents, or from every indexed
    /// document when `document_ids` is absent or empty.
    #[instrument(skip(self, question), fields(question_len = question.len()))]
    pub async fn ask(&self, question: &str, document_ids: Option<&[String]>) -> Result<Answer> {
        let start = Instant::now();
        let result = self.answer(question, document_ids).await;

        let (documents, outcome) = match &result {
            Ok(answer) => (answer.sources.len(), "answered"),
            Err(AppError::NoDocumentsIndexed) => (0, "no_documents"),
            Err(AppError::NoRelevantContent) => (0, "no_content"),
            Err(e) if e.is_client_error() => (0, "rejected"),
            Err(_) => (0, "failed"),
        };
        metrics::record_question(start.elapsed().as_secs_f64(), documents, outcome);
        result
    }

    async fn answer(&self, question: &str, document_ids: Option<&[String]>) -> Result<Answer> {
        if question.trim().is_empty() {
            return Err(AppError::Validation {
                message: "Question must not be empty".to_string(),
                field: Some("question".to_string()),
            });
        }

        debug!(phase = AskPhase::Resolving.as_str());
        let targets = self.resolve(document_ids).await?;
        let trees = self.load(&targets).await?;
        let sources: Vec<String> = trees.iter().map(|t| t.document_id.clone()).collect();

        debug!(phase = AskPhase::Extracting.as_str(), documents = trees.len());
        let contexts = self.select(&trees, question).await;
        if contexts.is_empty() {
            return Err(AppError::NoRelevantContent);
        }

        debug!(phase = AskPhase::Synthesizing.as_str(), contexts = contexts.len());
        let merged = merge_contexts(&contexts);
        let answer = self.synthesize(question, &merged).await?;

        info!(
            phase = AskPhase::Done.as_str(),
            sources = ?sources,
            "Question answered"
        );
        Ok(Answer {
            question: question.to_string(),
            answer,
            sources,
        })
    }

    /// Ids to query: the caller's list (deduplicated, order kept) or every
    /// usable snapshot.
    async fn resolve(&self, document_ids: Option<&[String]>) -> Result<Vec<String>> {
        if self.store.list().await?.is_empty() {
            return Err(AppError::NoDocumentsIndexed);
        }

        let targets = match document_ids {
            Some(ids) if !ids.is_empty() => {
                let mut seen = HashSet::new();
                ids.iter()
                    .filter(|id| seen.insert(id.as_str()))
                    .cloned()
                    .collect()
            }
            _ => self.store.rehydrate_all().await?,
        };

        if targets.is_empty() {
            return Err(AppError::NoDocumentsIndexed);
        }
        Ok(targets)
    }

    /// Fetch trees for `targets`, skipping ids that are not indexed
    async fn load(&self, targets: &[String]) -> Result<Vec<Arc<Tree>>> {
        let mut trees = Vec::with_capacity(targets.len());
        for document_id in targets {
            match self.store.get(document_id).await {
                Ok(tree) => trees.push(tree),
                Err(AppError::DocumentNotFound { .. }) => {
                    debug!(document_id = %document_id, "Requested document not indexed, skipping");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(trees)
    }

    async fn select(&self, trees: &[Arc<Tree>], question: &str) -> Vec<DocumentContext> {
        let selections = join_all(
            trees
                .iter()
                .map(|tree| self.selector.select(tree, question)),
        )
        .await;

        trees
            .iter()
            .zip(selections)
            .filter(|(_, selection)| !selection.is_empty())
            .map(|(tree, selection)| DocumentContext {
                document_id: tree.document_id.clone(),
                selection,
            })
            .collect()
    }

    async fn synthesize(&self, question: &str, context: &str) -> Result<String> {
        let request = CompletionRequest::new(
            CompletionPurpose::Synthesis,
            SYNTHESIS_SYSTEM_PROMPT,
            format!(
                "Context from documents:\n\n{}\n\nQuestion: {}\n\n\
                Please provide a detailed answer based on the context above.",
                context, question
            ),
        )
        .temperature(self.synthesis_temperature);

        self.completion.complete(&request).await
    }
}

/// `[Document: <id>]` header per document, documents separated by a rule
fn merge_contexts(contexts: &[DocumentContext]) -> String {
    contexts
        .iter()
        .map(|ctx| {
            format!(
                "[Document: {}]\n{}",
                ctx.document_id,
                ctx.selection.fragments.join("\n\n")
            )
        })
        .collect::<Vec<_>>()
        .join(DOCUMENT_SEPARATOR)
}
