//! Tree builder seam
//!
//! A [`TreeBuilder`] turns one uploaded file into a [`Tree`]. The
//! [`BuilderSet`] picks the builder for a file: the remote structuring
//! service when one is configured, otherwise the local builder for the
//! file's kind.

use crate::errors::IngestionError;
use crate::markdown::MarkdownBuilder;
use crate::pdf::PdfBuilder;
use crate::remote::RemoteBuilder;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use treerag_common::config::BuilderConfig;
use treerag_common::errors::{AppError, Result};
use treerag_common::tree::Tree;

/// Extensions accepted for upload, lowercase with the leading dot
pub const ALLOWED_EXTENSIONS: [&str; 3] = [".pdf", ".md", ".markdown"];

/// What kind of file a builder is working on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Markdown,
}

impl DocumentKind {
    /// Classify by extension, case-insensitively
    pub fn from_filename(filename: &str) -> Result<Self> {
        let extension = Path::new(filename)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();

        match extension.as_str() {
            ".pdf" => Ok(DocumentKind::Pdf),
            ".md" | ".markdown" => Ok(DocumentKind::Markdown),
            _ => Err(AppError::UnsupportedFileType {
                extension: if extension.is_empty() {
                    "(none)".to_string()
                } else {
                    extension
                },
                allowed: ALLOWED_EXTENSIONS.join(", "),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Markdown => "markdown",
        }
    }
}

/// A saved upload waiting to be structured
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub document_id: String,
    /// Upload filename, as given by the client
    pub filename: String,
    /// Where the upload was saved
    pub path: PathBuf,
    pub kind: DocumentKind,
}

/// Options forwarded to builders
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub model: String,
    pub toc_check_page_num: usize,
    pub max_page_num_each_node: usize,
    pub max_token_num_each_node: usize,
    pub add_node_id: bool,
    pub add_node_summary: bool,
    pub add_doc_description: bool,
    pub add_node_text: bool,
    pub summary_token_threshold: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::from(&BuilderConfig::default())
    }
}

impl From<&BuilderConfig> for BuildOptions {
    fn from(config: &BuilderConfig) -> Self {
        Self {
            model: config.model.clone(),
            toc_check_page_num: config.toc_check_page_num,
            max_page_num_each_node: config.max_page_num_each_node.max(1),
            max_token_num_each_node: config.max_token_num_each_node,
            add_node_id: config.add_node_id,
            add_node_summary: config.add_node_summary,
            add_doc_description: config.add_doc_description,
            add_node_text: config.add_node_text,
            summary_token_threshold: config.summary_token_threshold,
        }
    }
}

/// Builds a structure tree from a saved document
#[async_trait]
pub trait TreeBuilder: Send + Sync {
    async fn build(
        &self,
        source: &SourceDocument,
        options: &BuildOptions,
    ) -> std::result::Result<Tree, IngestionError>;

    /// Short label for logs and metrics
    fn name(&self) -> &'static str;

    /// Whether the output still needs ids, summaries and description added
    fn needs_enrichment(&self) -> bool {
        true
    }
}

/// Builder lookup by document kind
#[derive(Clone)]
pub struct BuilderSet {
    remote: Option<Arc<dyn TreeBuilder>>,
    markdown: Arc<dyn TreeBuilder>,
    pdf: Arc<dyn TreeBuilder>,
}

impl BuilderSet {
    /// Local builders only
    pub fn local() -> Self {
        Self {
            remote: None,
            markdown: Arc::new(MarkdownBuilder::new()),
            pdf: Arc::new(PdfBuilder::new()),
        }
    }

    /// Remote builder when an endpoint is configured, local builders otherwise
    pub fn from_config(config: &BuilderConfig) -> Result<Self> {
        let mut set = Self::local();
        if let Some(endpoint) = config.remote_endpoint.as_deref().filter(|e| !e.is_empty()) {
            tracing::info!(endpoint = %endpoint, "Using remote structuring service");
            set.remote = Some(Arc::new(RemoteBuilder::new(endpoint, config.timeout_secs)?));
        }
        Ok(set)
    }

    /// Route every kind to the same builder
    pub fn uniform(builder: Arc<dyn TreeBuilder>) -> Self {
        Self {
            remote: None,
            markdown: Arc::clone(&builder),
            pdf: builder,
        }
    }

    pub fn for_kind(&self, kind: DocumentKind) -> Arc<dyn TreeBuilder> {
        if let Some(remote) = &self.remote {
            return Arc::clone(remote);
        }
        match kind {
            DocumentKind::Pdf => Arc::clone(&self.pdf),
            DocumentKind::Markdown => Arc::clone(&self.markdown),
        }
    }
}
