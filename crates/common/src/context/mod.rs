//! Context engine
//!
//! Turns indexed trees into answers:
//! - [`ContextExtractor`] renders a tree into depth-bounded context text
//! - [`RelevanceSelector`] picks the context for one document and query
//! - [`QueryOrchestrator`] fans out across documents and synthesizes the answer

mod extractor;
mod orchestrator;
mod selector;

pub use extractor::{
    extract, ContextExtractor, ContextFragments, DEFAULT_TEXT_INCLUSION_THRESHOLD,
    FRAGMENT_SEPARATOR,
};
pub use orchestrator::{Answer, AskPhase, QueryOrchestrator, DOCUMENT_SEPARATOR};
pub use selector::{RelevanceSelector, Selection, SelectorConfig};
