//! Configuration management for EchoSelf services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Queue / dispatch configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Cross-encoder scorer configuration
    #[serde(default)]
    pub scorer: ScorerConfig,

    /// Generation service configuration
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Worker configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// SQS inference queue URL (None => in-process fallback)
    pub inference_queue_url: Option<String>,

    /// SQS training queue URL
    pub training_queue_url: Option<String>,

    /// SQS rerank queue URL
    pub rerank_queue_url: Option<String>,

    /// Reply queue URL for job completion events
    pub reply_queue_url: Option<String>,

    /// Enqueue attempts before surfacing failure
    #[serde(default = "default_job_attempts")]
    pub attempts: u32,

    /// Initial backoff between attempts in milliseconds
    #[serde(default = "default_backoff_ms")]
    pub backoff_initial_ms: u64,

    /// Long polling timeout in seconds
    #[serde(default = "default_queue_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Visibility timeout in seconds
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,

    /// Prune completed job records older than this (seconds)
    #[serde(default = "default_prune_age")]
    pub prune_age_secs: u64,

    /// Keep at most this many completed job records
    #[serde(default = "default_prune_count")]
    pub prune_max_records: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScorerConfig {
    /// Cross-encoder endpoint (None disables augmentation)
    pub endpoint: Option<String>,

    /// Model identifier passed to the scorer
    pub model: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_scorer_timeout")]
    pub timeout_secs: u64,

    /// Blend weight for cross-encoder scores (0.0 - 1.0)
    #[serde(default = "default_blend_weight")]
    pub blend_weight: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// Generation service endpoint
    #[serde(default = "default_generation_endpoint")]
    pub endpoint: String,

    /// API key for the generation service
    pub api_key: Option<String>,

    /// Model name
    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,

    /// Training service endpoint
    pub trainer_endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Upper bound on concurrent inference/rerank jobs per worker
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Default job timeout in milliseconds
    #[serde(default = "default_job_timeout_ms")]
    pub job_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
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
fn default_job_attempts() -> u32 { 2 }
fn default_backoff_ms() -> u64 { 1000 }
fn default_queue_poll_timeout() -> u64 { 20 }
fn default_visibility_timeout() -> u64 { 300 }
fn default_prune_age() -> u64 { 3600 }
fn default_prune_count() -> usize { 1000 }
fn default_scorer_timeout() -> u64 { 10 }
fn default_blend_weight() -> f32 { 0.5 }
fn default_generation_endpoint() -> String { "http://localhost:8000/v1/generate".to_string() }
fn default_generation_model() -> String { crate::DEFAULT_GENERATION_MODEL.to_string() }
fn default_generation_timeout() -> u64 { 60 }
fn default_max_concurrency() -> usize { 4 }
fn default_job_timeout_ms() -> u64 { 120_000 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "echoself".to_string() }

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
            // e.g., APP__QUEUE__ATTEMPTS=3
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Whether a broker is configured for any job queue
    pub fn broker_configured(&self) -> bool {
        self.queue.inference_queue_url.is_some()
            || self.queue.training_queue_url.is_some()
            || self.queue.rerank_queue_url.is_some()
    }

    /// Get scorer timeout as Duration
    pub fn scorer_timeout(&self) -> Duration {
        Duration::from_secs(self.scorer.timeout_secs)
    }

    /// Get generation timeout as Duration
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation.timeout_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            inference_queue_url: None,
            training_queue_url: None,
            rerank_queue_url: None,
            reply_queue_url: None,
            attempts: default_job_attempts(),
            backoff_initial_ms: default_backoff_ms(),
            poll_timeout_secs: default_queue_poll_timeout(),
            visibility_timeout_secs: default_visibility_timeout(),
            prune_age_secs: default_prune_age(),
            prune_max_records: default_prune_count(),
        }
    }
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: None,
            timeout_secs: default_scorer_timeout(),
            blend_weight: default_blend_weight(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_generation_endpoint(),
            api_key: None,
            model: default_generation_model(),
            timeout_secs: default_generation_timeout(),
            trainer_endpoint: None,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            job_timeout_ms: default_job_timeout_ms(),
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

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            scorer: ScorerConfig::default(),
            generation: GenerationConfig::default(),
            worker: WorkerConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
