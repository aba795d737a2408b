//! Error types for EchoSelf services
//!
//! Provides:
//! - Distinct error types for different failure modes
//! - Error codes for client handling
//! - A typed record of degraded (fail-soft) paths

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
    InvalidFormat,

    // Resource errors (4xxx)
    NotFound,
    ChunkNotFound,
    JobNotFound,

    // External service errors (8xxx)
    UpstreamError,
    ScorerError,
    GenerationError,
    QueueError,

    // Dispatch errors (85xx)
    DispatchTimeout,
    WorkerFailed,

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
            ErrorCode::InvalidFormat => 1002,

            // Resources (4xxx)
            ErrorCode::NotFound => 4001,
            ErrorCode::ChunkNotFound => 4002,
            ErrorCode::JobNotFound => 4003,

            // External (8xxx)
            ErrorCode::UpstreamError => 8001,
            ErrorCode::ScorerError => 8002,
            ErrorCode::GenerationError => 8003,
            ErrorCode::QueueError => 8004,

            // Dispatch (85xx)
            ErrorCode::DispatchTimeout => 8501,
            ErrorCode::WorkerFailed => 8502,

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
    Validation { message: String },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    // External service errors
    #[error("Cross-encoder scorer error: {message}")]
    ScorerError { message: String },

    #[error("Generation service error: {message}")]
    GenerationError { message: String },

    #[error("Queue error: {message}")]
    QueueError { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Dispatch errors
    #[error("Job {job_id} timed out after {timeout_ms}ms")]
    DispatchTimeout { job_id: String, timeout_ms: u64 },

    #[error("Job {job_id} failed in worker: {message}")]
    WorkerFailed { job_id: String, message: String },

    // Internal errors
    #[error("Internal error: {message}")]
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
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::JobNotFound { .. } => ErrorCode::JobNotFound,
            AppError::ScorerError { .. } => ErrorCode::ScorerError,
            AppError::GenerationError { .. } => ErrorCode::GenerationError,
            AppError::QueueError { .. } => ErrorCode::QueueError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::DispatchTimeout { .. } => ErrorCode::DispatchTimeout,
            AppError::WorkerFailed { .. } => ErrorCode::WorkerFailed,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Whether the dispatch layer should retry this failure
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::QueueError { .. }
                | AppError::HttpClient(_)
                | AppError::WorkerFailed { .. }
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

/// Reason a component took a degraded path instead of failing.
///
/// Rerank and compose absorb collaborator failures (store lookups,
/// cross-encoder calls) and continue with local heuristics. The reason is
/// recorded here so callers and tests can see which fallback was taken.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum DegradedReason {
    /// Store accessor failed or returned nothing for a chunk id
    MetadataUnavailable { chunk_id: String },
    /// Cross-encoder scorer was unreachable or timed out
    ScorerUnavailable { message: String },
    /// Cross-encoder returned a score vector of the wrong length
    ScorerCountMismatch { expected: usize, actual: usize },
}
