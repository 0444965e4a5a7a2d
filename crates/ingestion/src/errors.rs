//! Ingestion error types

use thiserror::Error;
use treerag_common::errors::AppError;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("PDF parse error for {path}: {message}")]
    PdfParseError { path: String, message: String },

    #[error("No text content found in {path}")]
    EmptyDocument { path: String },

    #[error("Structuring service request failed: {0}")]
    RemoteError(String),

    #[error("Structuring service returned {status}: {body}")]
    RemoteStatus { status: u16, body: String },

    #[error("Invalid structure: {0}")]
    StructureError(String),

    #[error("Build task failed: {0}")]
    TaskError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl IngestionError {
    /// Attach the document id and surface as a build failure
    pub fn into_app_error(self, document_id: &str) -> AppError {
        AppError::BuildFailure {
            document_id: document_id.to_string(),
            message: self.to_string(),
        }
    }
}

impl From<AppError> for IngestionError {
    fn from(e: AppError) -> Self {
        IngestionError::StructureError(e.to_string())
    }
}

impl From<reqwest::Error> for IngestionError {
    fn from(e: reqwest::Error) -> Self {
        IngestionError::RemoteError(e.to_string())
    }
}

impl From<tokio::task::JoinError> for IngestionError {
    fn from(e: tokio::task::JoinError) -> Self {
        IngestionError::TaskError(e.to_string())
    }
}
