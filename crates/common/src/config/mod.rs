//! Configuration management for TreeRAG services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Upload and snapshot locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Completion service configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Tree builder configuration
    #[serde(default)]
    pub builder: BuilderConfig,

    /// Retrieval tuning
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds (uploads build synchronously, so this is generous)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum accepted upload size in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Where raw uploads are written
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Where `<id>_structure.json` snapshots live
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Chat completions endpoint
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// API key; the offline completion is used when absent
    pub api_key: Option<String>,

    /// Model to use
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Maximum output tokens per completion
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BuilderConfig {
    /// External structuring service; local builders are used when absent
    pub remote_endpoint: Option<String>,

    /// Remote build timeout in seconds
    #[serde(default = "default_build_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_toc_check_page_num")]
    pub toc_check_page_num: usize,

    #[serde(default = "default_max_page_num_each_node")]
    pub max_page_num_each_node: usize,

    #[serde(default = "default_max_token_num_each_node")]
    pub max_token_num_each_node: usize,

    #[serde(default = "default_true")]
    pub add_node_id: bool,

    #[serde(default = "default_true")]
    pub add_node_summary: bool,

    #[serde(default = "default_true")]
    pub add_doc_description: bool,

    #[serde(default)]
    pub add_node_text: bool,

    /// Node text shorter than this (in estimated tokens) is its own summary
    #[serde(default = "default_summary_token_threshold")]
    pub summary_token_threshold: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Traversal depth for the primary selection path
    #[serde(default = "default_primary_depth")]
    pub primary_depth: usize,

    /// Traversal depth when the reasoning call fails
    #[serde(default = "default_fallback_depth")]
    pub fallback_depth: usize,

    /// Node text at or above this many characters is left out of the context
    #[serde(default = "default_text_inclusion_threshold")]
    pub text_inclusion_threshold: usize,

    /// Character cap on the tree JSON sent to the reasoning call
    #[serde(default = "default_structure_char_cap")]
    pub structure_char_cap: usize,

    /// Maximum fragments per document
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_selection_temperature")]
    pub selection_temperature: f32,

    #[serde(default = "default_synthesis_temperature")]
    pub synthesis_temperature: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level / filter directive (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8000 }
fn default_request_timeout() -> u64 { 600 }
fn default_max_upload_bytes() -> usize { 50 * 1024 * 1024 }
fn default_upload_dir() -> PathBuf { PathBuf::from("../uploads") }
fn default_index_dir() -> PathBuf { PathBuf::from("./indices") }
fn default_llm_endpoint() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_llm_model() -> String { "gpt-4o-2024-11-20".to_string() }
fn default_llm_timeout() -> u64 { 120 }
fn default_llm_max_tokens() -> usize { 2000 }
fn default_build_timeout() -> u64 { 900 }
fn default_toc_check_page_num() -> usize { 20 }
fn default_max_page_num_each_node() -> usize { 10 }
fn default_max_token_num_each_node() -> usize { 20000 }
fn default_true() -> bool { true }
fn default_summary_token_threshold() -> usize { 200 }
fn default_primary_depth() -> usize { 4 }
fn default_fallback_depth() -> usize { 3 }
fn default_text_inclusion_threshold() -> usize { 5000 }
fn default_structure_char_cap() -> usize { 4000 }
fn default_top_k() -> usize { 5 }
fn default_selection_temperature() -> f32 { 0.3 }
fn default_synthesis_temperature() -> f32 { 0.7 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "treerag".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: AppConfig = config.try_deserialize()?;
        config.apply_env_fallbacks();
        Ok(config)
    }

    /// Load from a specific config file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: AppConfig = config.try_deserialize()?;
        config.apply_env_fallbacks();
        Ok(config)
    }

    /// Honour the conventional `OPENAI_API_KEY` when no key is configured
    fn apply_env_fallbacks(&mut self) {
        if self.llm.api_key.as_deref().map_or(true, str::is_empty) {
            self.llm.api_key = std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|key| !key.is_empty());
        }
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }
}

impl LlmConfig {
    /// Per-call completion timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            index_dir: default_index_dir(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: None,
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
            max_tokens: default_llm_max_tokens(),
        }
    }
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            remote_endpoint: None,
            timeout_secs: default_build_timeout(),
            model: default_llm_model(),
            toc_check_page_num: default_toc_check_page_num(),
            max_page_num_each_node: default_max_page_num_each_node(),
            max_token_num_each_node: default_max_token_num_each_node(),
            add_node_id: true,
            add_node_summary: true,
            add_doc_description: true,
            add_node_text: false,
            summary_token_threshold: default_summary_token_threshold(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            primary_depth: default_primary_depth(),
            fallback_depth: default_fallback_depth(),
            text_inclusion_threshold: default_text_inclusion_threshold(),
            structure_char_cap: default_structure_char_cap(),
            top_k: default_top_k(),
            selection_temperature: default_selection_temperature(),
            synthesis_temperature: default_synthesis_temperature(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.llm.model, "gpt-4o-2024-11-20");
        assert_eq!(config.storage.index_dir, PathBuf::from("./indices"));
    }

    #[test]
    fn test_retrieval_defaults() {
        let retrieval = RetrievalConfig::default();
        assert_eq!(retrieval.primary_depth, 4);
        assert_eq!(retrieval.fallback_depth, 3);
        assert_eq!(retrieval.text_inclusion_threshold, 5000);
        assert_eq!(retrieval.structure_char_cap, 4000);
        assert_eq!(retrieval.top_k, 5);
    }

    #[test]
    fn test_partial_section_fills_defaults() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "server": { "port": 9001 },
            "builder": { "add_node_text": true }
        }))
        .unwrap();
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(config.builder.add_node_text);
        assert_eq!(config.builder.max_page_num_each_node, 10);
        assert_eq!(config.retrieval.top_k, 5);
    }

    #[test]
    fn test_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.toml");
        std::fs::write(
            &path,
            "[retrieval]\ntop_k = 2\n\n[llm]\ntimeout_secs = 7\n",
        )
        .unwrap();

        let config = AppConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.retrieval.top_k, 2);
        assert_eq!(config.retrieval.fallback_depth, 3);
        assert_eq!(config.llm.timeout(), Duration::from_secs(7));
    }
}
