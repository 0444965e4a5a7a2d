//! Question answering handler

use axum::{extract::State, Json};
use serde::Deserialize;
use validator::Validate;

use crate::AppState;
use treerag_common::{context::Answer, errors::Result};

/// Question over some or all indexed documents
#[derive(Debug, Deserialize, Validate)]
pub struct AskRequest {
    #[validate(length(min = 1, max = 4000, message = "Question must be 1-4000 characters"))]
    pub question: String,

    /// Documents to consult; all indexed documents when absent or empty
    #[serde(default)]
    pub document_ids: Option<Vec<String>>,
}

pub async fn ask(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<Answer>> {
    request.validate()?;

    let answer = state
        .orchestrator
        .ask(&request.question, request.document_ids.as_deref())
        .await?;

    Ok(Json(answer))
}
