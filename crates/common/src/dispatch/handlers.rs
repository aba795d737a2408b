//! Job handlers
//!
//! One handler per job kind. The same registry backs both the worker
//! processes and the dispatcher's in-process fallback, which is what keeps
//! the two paths functionally equivalent.

use super::JobKind;
use crate::config::GenerationConfig;
use crate::context::{
    calibrate_style, compose_cited_context, compress_history, detect_source_intent,
    ComposeOptions, ComposedContext, ConversationTurn, HistoryOptions, Persona,
};
use crate::errors::{AppError, DegradedReason, Result};
use crate::generation::{GenerationRequest, GenerationService};
use crate::rerank::{Candidate, Reranker, RerankOptions};
use crate::store::StoreAccessor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};

/// A unit of executable job logic
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Which job kind this handler serves
    fn kind(&self) -> JobKind;

    /// Execute the job against its JSON payload
    async fn handle(&self, payload: serde_json::Value) -> Result<serde_json::Value>;
}

/// Handler registry, one handler per job kind
#[derive(Default)]
pub struct JobRegistry {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own kind, replacing any previous one
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    /// Look up the handler for a kind
    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&kind).cloned()
    }
}

/// Rerank job payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankJobPayload {
    pub query: String,
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub preferred_sources: Vec<String>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// Handler running the local reranker (with whatever cross-encoder the
/// reranker was built with)
pub struct RerankHandler {
    reranker: Arc<Reranker>,
}

impl RerankHandler {
    pub fn new(reranker: Arc<Reranker>) -> Self {
        Self { reranker }
    }
}

#[async_trait]
impl JobHandler for RerankHandler {
    fn kind(&self) -> JobKind {
        JobKind::Rerank
    }

    #[instrument(skip(self, payload))]
    async fn handle(&self, payload: serde_json::Value) -> Result<serde_json::Value> {
        let job: RerankJobPayload = serde_json::from_value(payload)?;

        let options = RerankOptions {
            preferred_sources: job.preferred_sources,
            top_k: job.top_k,
        };
        let outcome = self
            .reranker
            .rerank_with_report(&job.query, &job.candidates, &options)
            .await;

        Ok(serde_json::json!({
            "candidates": outcome.candidates,
            "degraded": outcome.degraded,
        }))
    }
}

/// Inference job payload: everything needed to answer in the user's voice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceJobPayload {
    pub query: String,
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    #[serde(default)]
    pub persona: Option<Persona>,
    #[serde(default)]
    pub persona_description: Option<String>,
}

/// Inference job result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResult {
    pub answer: String,
    pub context: ComposedContext,
    pub degraded: Vec<DegradedReason>,
}

/// Handler running the full answer pipeline: intent detection, rerank,
/// context composition, history compression, generation, style calibration
pub struct InferenceHandler {
    store: Arc<dyn StoreAccessor>,
    reranker: Arc<Reranker>,
    generation: Arc<dyn GenerationService>,
}

impl InferenceHandler {
    pub fn new(
        store: Arc<dyn StoreAccessor>,
        reranker: Arc<Reranker>,
        generation: Arc<dyn GenerationService>,
    ) -> Self {
        Self {
            store,
            reranker,
            generation,
        }
    }
}

#[async_trait]
impl JobHandler for InferenceHandler {
    fn kind(&self) -> JobKind {
        JobKind::Inference
    }

    #[instrument(skip(self, payload))]
    async fn handle(&self, payload: serde_json::Value) -> Result<serde_json::Value> {
        let job: InferenceJobPayload = serde_json::from_value(payload)?;

        // Detected sources are a soft boost, never a filter
        let intent = detect_source_intent(&job.query);
        let preferred_sources: Vec<String> =
            intent.sources.iter().map(|s| s.as_str().to_string()).collect();

        let ranked = self
            .reranker
            .rerank_with_report(
                &job.query,
                &job.candidates,
                &RerankOptions {
                    preferred_sources,
                    top_k: None,
                },
            )
            .await;

        let context = compose_cited_context(
            self.store.as_ref(),
            &ranked.candidates,
            &ComposeOptions::default(),
        )
        .await;

        let history = compress_history(&job.history, &HistoryOptions::default());

        let raw_answer = self
            .generation
            .generate(&GenerationRequest {
                query: job.query.clone(),
                context: context.context_text.clone(),
                history,
                persona_description: job.persona_description.clone(),
            })
            .await?;

        let answer = calibrate_style(&raw_answer, job.persona.as_ref());

        info!(
            citations = context.citations.len(),
            degraded = ranked.degraded.len(),
            "Inference complete"
        );

        let result = InferenceResult {
            answer,
            context,
            degraded: ranked.degraded,
        };
        Ok(serde_json::to_value(result)?)
    }
}

/// Training job payload, forwarded to the external trainer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingJobPayload {
    /// Location of the prepared training corpus
    pub corpus_uri: String,
    #[serde(default)]
    pub epochs: Option<u32>,
    #[serde(default)]
    pub base_model: Option<String>,
}

/// Handler forwarding training requests to the external trainer service.
///
/// Training is resource-heavy; the worker pins this kind to concurrency 1.
pub struct TrainingHandler {
    client: reqwest::Client,
    trainer_endpoint: Option<String>,
}

impl TrainingHandler {
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            trainer_endpoint: config.trainer_endpoint.clone(),
        })
    }
}

#[async_trait]
impl JobHandler for TrainingHandler {
    fn kind(&self) -> JobKind {
        JobKind::Training
    }

    #[instrument(skip(self, payload))]
    async fn handle(&self, payload: serde_json::Value) -> Result<serde_json::Value> {
        let job: TrainingJobPayload = serde_json::from_value(payload)?;

        let Some(endpoint) = &self.trainer_endpoint else {
            return Err(AppError::Configuration {
                message: "No trainer endpoint configured".to_string(),
            });
        };

        let response = self
            .client
            .post(endpoint)
            .json(&job)
            .send()
            .await
            .map_err(|e| AppError::GenerationError {
                message: format!("Trainer request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::GenerationError {
                message: format!("Trainer error {}: {}", status, body),
            });
        }

        let accepted: serde_json::Value = response.json().await.unwrap_or_else(|_| {
            serde_json::json!({ "accepted": true })
        });

        info!(corpus = %job.corpus_uri, "Training job forwarded");
        Ok(accepted)
    }
}
