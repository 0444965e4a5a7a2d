//! Health check handlers

use axum::{extract::State, Json};
use serde::Serialize;
use crate::AppState;

#[derive(Serialize)]
pub struct BannerResponse {
    pub message: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub index_store: CheckResult,
    pub completion: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Service banner
pub async fn root() -> Json<BannerResponse> {
    Json(BannerResponse {
        message: "TreeRAG API".to_string(),
        version: treerag_common::VERSION.to_string(),
    })
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

/// Readiness probe - the snapshot directory must be reachable
pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    let start = std::time::Instant::now();

    let index_check = match tokio::fs::metadata(state.store.index_dir()).await {
        Ok(meta) if meta.is_dir() => CheckResult {
            status: "up".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
            detail: Some(format!("{} documents in memory", state.store.len())),
        },
        Ok(_) => CheckResult {
            status: "down".to_string(),
            latency_ms: None,
            detail: Some("index path is not a directory".to_string()),
        },
        Err(e) => CheckResult {
            status: "down".to_string(),
            latency_ms: None,
            detail: Some(e.to_string()),
        },
    };

    let completion_check = CheckResult {
        status: "up".to_string(),
        latency_ms: None,
        detail: Some(state.completion.model_name().to_string()),
    };

    let all_healthy = index_check.status == "up";

    Json(ReadyResponse {
        status: if all_healthy { "ready" } else { "not_ready" }.to_string(),
        checks: HealthChecks {
            index_store: index_check,
            completion: completion_check,
        },
    })
}
