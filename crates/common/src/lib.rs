//! EchoSelf Common Library
//!
//! Shared code for the EchoSelf persona services including:
//! - Source intent detection and context composition
//! - Candidate reranking with cross-encoder blending
//! - Conversation history compression and style calibration
//! - Async job dispatch (queue-backed with in-process fallback)
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod config;
pub mod context;
pub mod dispatch;
pub mod errors;
pub mod generation;
pub mod metrics;
pub mod rerank;
pub mod store;

// Re-export commonly used types
pub use config::AppConfig;
pub use dispatch::{Dispatcher, JobKind};
pub use errors::{AppError, DegradedReason, Result};
pub use rerank::{Candidate, Reranker};
pub use store::StoreAccessor;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default generation model
pub const DEFAULT_GENERATION_MODEL: &str = "persona-chat";
