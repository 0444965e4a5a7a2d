//! Metrics and observability utilities
//!
//! Prometheus metrics with standardized naming conventions. Recording is a
//! no-op until an exporter is installed, so library code and tests can call
//! these helpers freely.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all TreeRAG metrics
pub const METRICS_PREFIX: &str = "treerag";

/// Buckets for request latency (in seconds); answers wait on a model, so the tail is long
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.025,  // 25ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 1m
];

/// Buckets for tree builds (minutes for large PDFs)
pub const BUILD_BUCKETS: &[f64] = &[
    0.100,  // 100ms
    1.000,  // 1s
    5.000,  // 5s
    15.00,  // 15s
    60.00,  // 1m
    300.0,  // 5m
    900.0,  // 15m
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Build metrics
    describe_counter!(
        format!("{}_builds_total", METRICS_PREFIX),
        Unit::Count,
        "Tree builds by outcome"
    );

    describe_histogram!(
        format!("{}_build_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Tree build latency in seconds"
    );

    describe_gauge!(
        format!("{}_documents_indexed", METRICS_PREFIX),
        Unit::Count,
        "Trees currently held in memory"
    );

    describe_counter!(
        format!("{}_snapshots_rehydrated_total", METRICS_PREFIX),
        Unit::Count,
        "Snapshots loaded lazily from disk"
    );

    // Question answering metrics
    describe_counter!(
        format!("{}_questions_total", METRICS_PREFIX),
        Unit::Count,
        "Questions answered by outcome"
    );

    describe_histogram!(
        format!("{}_question_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end question latency in seconds"
    );

    describe_counter!(
        format!("{}_selection_fallbacks_total", METRICS_PREFIX),
        Unit::Count,
        "Selections that fell back to structural traversal after a service failure"
    );

    // Completion service metrics
    describe_counter!(
        format!("{}_completion_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Completion service calls by purpose and status"
    );

    describe_histogram!(
        format!("{}_completion_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Completion service latency in seconds"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record build metrics
pub fn record_build(duration_secs: f64, kind: &str, outcome: &str) {
    counter!(
        format!("{}_builds_total", METRICS_PREFIX),
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_build_duration_seconds", METRICS_PREFIX),
        "kind" => kind.to_string()
    )
    .record(duration_secs);
}

/// Helper to record the size of the in-memory index
pub fn record_index_size(documents: usize) {
    gauge!(format!("{}_documents_indexed", METRICS_PREFIX)).set(documents as f64);
}

/// Helper to record a lazy snapshot load
pub fn record_rehydration() {
    counter!(format!("{}_snapshots_rehydrated_total", METRICS_PREFIX)).increment(1);
}

/// Helper to record question metrics
pub fn record_question(duration_secs: f64, documents: usize, outcome: &str) {
    counter!(
        format!("{}_questions_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_question_duration_seconds", METRICS_PREFIX),
        "documents" => documents.min(10).to_string()
    )
    .record(duration_secs);
}

/// Helper to record a structural fallback in relevance selection
pub fn record_selection_fallback() {
    counter!(format!("{}_selection_fallbacks_total", METRICS_PREFIX)).increment(1);
}

/// Helper to record completion service metrics
pub fn record_completion(duration_secs: f64, purpose: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_completion_requests_total", METRICS_PREFIX),
        "purpose" => purpose.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_completion_duration_seconds", METRICS_PREFIX),
            "purpose" => purpose.to_string()
        )
        .record(duration_secs);
    }
}
