//! Client for an external structuring service
//!
//! The raw upload is posted as multipart `file` together with the build
//! options as text fields; the service answers with the structure JSON,
//! which is decoded leniently into a [`Tree`].

use crate::builder::{BuildOptions, SourceDocument, TreeBuilder};
use crate::errors::IngestionError;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use tracing::{debug, info};
use treerag_common::errors::{AppError, Result};
use treerag_common::tree::{decode_tree, Tree};

const MAX_ERROR_BODY: usize = 512;

/// Builds trees by delegating to a structuring service over HTTP
pub struct RemoteBuilder {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteBuilder {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    fn form(bytes: Vec<u8>, source: &SourceDocument, options: &BuildOptions) -> Form {
        let yes_no = |flag: bool| if flag { "yes" } else { "no" };

        Form::new()
            .part("file", Part::bytes(bytes).file_name(source.filename.clone()))
            .text("model", options.model.clone())
            .text("toc_check_page_num", options.toc_check_page_num.to_string())
            .text("max_page_num_each_node", options.max_page_num_each_node.to_string())
            .text("max_token_num_each_node", options.max_token_num_each_node.to_string())
            .text("if_add_node_id", yes_no(options.add_node_id))
            .text("if_add_node_summary", yes_no(options.add_node_summary))
            .text("if_add_doc_description", yes_no(options.add_doc_description))
            .text("if_add_node_text", yes_no(options.add_node_text))
    }
}

#[async_trait]
impl TreeBuilder for RemoteBuilder {
    async fn build(
        &self,
        source: &SourceDocument,
        options: &BuildOptions,
    ) -> std::result::Result<Tree, IngestionError> {
        let bytes = tokio::fs::read(&source.path).await?;
        debug!(
            document_id = %source.document_id,
            bytes = bytes.len(),
            endpoint = %self.endpoint,
            "Posting document to structuring service"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(Self::form(bytes, source, options))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestionError::RemoteStatus {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        let value: serde_json::Value = response.json().await?;
        let tree = decode_tree(&source.document_id, value)?;
        let tree = match tree.source {
            Some(_) => tree,
            None => tree.with_source(source.filename.clone()),
        };

        info!(
            document_id = %source.document_id,
            nodes = tree.node_count(),
            "Structure received from remote builder"
        );
        Ok(tree)
    }

    fn name(&self) -> &'static str {
        "remote"
    }

    fn needs_enrichment(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::DocumentKind;

    #[tokio::test]
    async fn test_unreachable_service_is_remote_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        tokio::fs::write(&path, b"%PDF-1.5").await.unwrap();

        let builder = RemoteBuilder::new("http://127.0.0.1:9/build", 2).unwrap();
        let source = SourceDocument {
            document_id: "report".into(),
            filename: "report.pdf".into(),
            path,
            kind: DocumentKind::Pdf,
        };

        let err = builder
            .build(&source, &BuildOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestionError::RemoteError(_)));
    }

    #[tokio::test]
    async fn test_missing_upload_is_io_error() {
        let builder = RemoteBuilder::new("http://127.0.0.1:9/build", 2).unwrap();
        let source = SourceDocument {
            document_id: "gone".into(),
            filename: "gone.md".into(),
            path: "/nonexistent/gone.md".into(),
            kind: DocumentKind::Markdown,
        };

        let err = builder
            .build(&source, &BuildOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestionError::IoError(_)));
    }

    #[test]
    fn test_remote_output_is_not_enriched_again() {
        let builder = RemoteBuilder::new("http://localhost/build", 2).unwrap();
        assert!(!builder.needs_enrichment());
        assert_eq!(builder.name(), "remote");
    }
}
