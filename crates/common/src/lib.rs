//! TreeRAG Common Library
//!
//! Shared code for the TreeRAG services:
//! - Tree model and structure decoding
//! - Per-document index store with snapshot persistence
//! - Context engine (extraction, selection, answer orchestration)
//! - Completion service abstraction
//! - Error types, configuration, and metrics

pub mod config;
pub mod context;
pub mod errors;
pub mod index;
pub mod llm;
pub mod metrics;
pub mod tree;

// Re-export commonly used types
pub use config::AppConfig;
pub use context::{Answer, QueryOrchestrator};
pub use errors::{AppError, Result};
pub use index::IndexStore;
pub use llm::CompletionService;
pub use tree::{Node, Tree};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
