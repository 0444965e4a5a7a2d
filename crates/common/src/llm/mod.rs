//! Completion service abstraction
//!
//! Relevance selection, answer synthesis and summary enrichment all talk to
//! a chat-completions style model through [`CompletionService`]:
//! - [`OpenAiCompletion`] for OpenAI-compatible endpoints
//! - [`OfflineCompletion`] when no API key is configured (development, tests)

mod offline;
mod openai;

pub use offline::{OfflineCompletion, TEXT_MARKER};
pub use openai::OpenAiCompletion;

use crate::config::LlmConfig;
use crate::errors::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Why a completion is requested; used for logging and metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionPurpose {
    /// Advisory identification of relevant sections
    Selection,
    /// Final answer generation
    Synthesis,
    /// Node summary during tree building
    Summary,
    /// Document-level description during tree building
    Description,
}

impl CompletionPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionPurpose::Selection => "selection",
            CompletionPurpose::Synthesis => "synthesis",
            CompletionPurpose::Summary => "summary",
            CompletionPurpose::Description => "description",
        }
    }
}

/// A single system + user prompt exchange
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub purpose: CompletionPurpose,
    pub system: String,
    pub user: String,
    pub temperature: f32,
    /// Overrides the configured output limit
    pub max_tokens: Option<usize>,
}

impl CompletionRequest {
    pub fn new(
        purpose: CompletionPurpose,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            purpose,
            system: system.into(),
            user: user.into(),
            temperature: 0.7,
            max_tokens: None,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Trait for text completion
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Run one completion; failures are `AppError::Service`
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Create a completion service based on configuration
pub fn create_completion(config: &LlmConfig) -> Result<Arc<dyn CompletionService>> {
    match config.api_key.as_deref() {
        Some(key) if !key.is_empty() => Ok(Arc::new(OpenAiCompletion::new(config)?)),
        _ => {
            tracing::warn!(
                model = %config.model,
                "No LLM API key configured, using offline completion"
            );
            Ok(Arc::new(OfflineCompletion::new()))
        }
    }
}
