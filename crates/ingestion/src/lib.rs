//! TreeRAG Ingestion
//!
//! Turns uploaded documents into indexed structure trees:
//! - [`builder`]: the builder seam and per-kind routing
//! - [`markdown`], [`pdf`]: local builders
//! - [`remote`]: external structuring service client
//! - [`enrich`]: node ids, summaries and document description
//! - [`processor`]: the upload-to-index pipeline

pub mod builder;
pub mod enrich;
pub mod errors;
pub mod markdown;
pub mod pdf;
pub mod processor;
pub mod remote;

pub use builder::{BuildOptions, BuilderSet, DocumentKind, SourceDocument, TreeBuilder};
pub use enrich::Enricher;
pub use errors::IngestionError;
pub use processor::{IndexingPipeline, UploadReceipt};
