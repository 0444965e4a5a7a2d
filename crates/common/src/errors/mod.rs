//! Error types for TreeRAG services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for each failure mode of indexing and retrieval
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingField,
    UnsupportedFileType,
    PayloadTooLarge,
    InvalidTree,

    // Resource errors (4xxx)
    DocumentNotFound,
    NoDocumentsIndexed,
    NoRelevantContent,

    // Conflict errors (5xxx)
    AlreadyBuilding,

    // Storage errors (7xxx)
    SnapshotError,

    // External service errors (8xxx)
    BuildFailure,
    ServiceError,
    UpstreamError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,
            ErrorCode::UnsupportedFileType => 1003,
            ErrorCode::PayloadTooLarge => 1004,
            ErrorCode::InvalidTree => 1005,

            // Resources (4xxx)
            ErrorCode::DocumentNotFound => 4001,
            ErrorCode::NoDocumentsIndexed => 4002,
            ErrorCode::NoRelevantContent => 4003,

            // Conflicts (5xxx)
            ErrorCode::AlreadyBuilding => 5001,

            // Storage (7xxx)
            ErrorCode::SnapshotError => 7001,

            // External (8xxx)
            ErrorCode::BuildFailure => 8001,
            ErrorCode::ServiceError => 8002,
            ErrorCode::UpstreamError => 8003,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    #[error("Unsupported file type '{extension}'. Allowed types: {allowed}")]
    UnsupportedFileType { extension: String, allowed: String },

    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Invalid tree: {message}")]
    InvalidTree { message: String },

    // Resource errors
    #[error("Document not found: {id}")]
    DocumentNotFound { id: String },

    #[error("No documents indexed. Please upload documents first.")]
    NoDocumentsIndexed,

    #[error("No relevant content found in the documents")]
    NoRelevantContent,

    // Conflict errors
    #[error("A build is already in progress for document {document_id}")]
    AlreadyBuilding { document_id: String },

    // Storage errors
    #[error("Snapshot error for {path}: {message}")]
    Snapshot { path: String, message: String },

    // External service errors
    #[error("Error building tree for {document_id}: {message}")]
    BuildFailure { document_id: String, message: String },

    #[error("Completion service error: {message}")]
    Service { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::UnsupportedFileType { .. } => ErrorCode::UnsupportedFileType,
            AppError::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            AppError::InvalidTree { .. } => ErrorCode::InvalidTree,
            AppError::DocumentNotFound { .. } => ErrorCode::DocumentNotFound,
            AppError::NoDocumentsIndexed => ErrorCode::NoDocumentsIndexed,
            AppError::NoRelevantContent => ErrorCode::NoRelevantContent,
            AppError::AlreadyBuilding { .. } => ErrorCode::AlreadyBuilding,
            AppError::Snapshot { .. } => ErrorCode::SnapshotError,
            AppError::BuildFailure { .. } => ErrorCode::BuildFailure,
            AppError::Service { .. } => ErrorCode::ServiceError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. }
            | AppError::MissingField { .. }
            | AppError::UnsupportedFileType { .. }
            | AppError::NoDocumentsIndexed => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AppError::DocumentNotFound { .. } | AppError::NoRelevantContent => {
                StatusCode::NOT_FOUND
            }

            // 409 Conflict
            AppError::AlreadyBuilding { .. } => StatusCode::CONFLICT,

            // 413 Payload Too Large
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            // 422 Unprocessable Entity
            AppError::InvalidTree { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            // 500 Internal Server Error
            AppError::Snapshot { .. }
            | AppError::BuildFailure { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::Service { .. } | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Whether the error came from an external collaborator
    pub fn is_service_error(&self) -> bool {
        matches!(self, AppError::Service { .. } | AppError::HttpClient(_))
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let details = match &self {
            AppError::Validation {
                field: Some(field), ..
            } => Some(serde_json::json!({ "field": field })),
            AppError::AlreadyBuilding { document_id } => {
                Some(serde_json::json!({ "document_id": document_id }))
            }
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        let field = err.field_errors().keys().next().map(|f| f.to_string());
        AppError::Validation {
            message: err.to_string(),
            field,
        }
    }
}
