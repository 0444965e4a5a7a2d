//! Document management handlers

use axum::{
    extract::{Multipart, Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use treerag_common::{
    errors::{AppError, Result},
    tree::Tree,
};
use treerag_ingestion::UploadReceipt;

/// One entry of the document listing
#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: String,
    pub filename: String,
    pub indexed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentList {
    pub documents: Vec<DocumentSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub message: String,
}

/// Accept a multipart `file` upload and index it before responding
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadReceipt>> {
    let limit = state.config.server.max_upload_bytes;

    while let Some(field) = multipart.next_field().await.map_err(|e| AppError::Validation {
        message: e.body_text(),
        field: Some("file".to_string()),
    })? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::MissingField {
                field: "filename".to_string(),
            })?;

        let bytes = field.bytes().await.map_err(|e| AppError::Validation {
            message: e.body_text(),
            field: Some("file".to_string()),
        })?;
        if bytes.len() > limit {
            return Err(AppError::PayloadTooLarge {
                size: bytes.len(),
                limit,
            });
        }

        let receipt = state.pipeline.ingest(&filename, &bytes).await?;
        return Ok(Json(receipt));
    }

    Err(AppError::MissingField {
        field: "file".to_string(),
    })
}

/// List every indexed document, loading snapshots that are not in memory yet
pub async fn list_documents(State(state): State<AppState>) -> Result<Json<DocumentList>> {
    let mut documents = Vec::new();

    for id in state.store.rehydrate_all().await? {
        match state.store.get(&id).await {
            Ok(tree) => documents.push(DocumentSummary {
                filename: tree.filename().to_string(),
                id,
                indexed: true,
            }),
            // deleted between the scan and the lookup
            Err(AppError::DocumentNotFound { .. }) => {}
            Err(e) => return Err(e),
        }
    }

    Ok(Json(DocumentList { documents }))
}

/// Return the stored tree for one document
pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Tree>> {
    let tree = state.store.get(&id).await?;
    Ok(Json(Tree::clone(&tree)))
}

/// Remove a document's tree, snapshot and saved upload; succeeds for unknown ids
pub async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let existed = state.store.delete(&id).await?;
    let uploads = state.pipeline.remove_uploads(&id).await?;

    tracing::info!(document_id = %id, existed, uploads, "Delete request handled");

    Ok(Json(DeleteResponse {
        message: format!("Document {} deleted successfully", id),
    }))
}
