//! Cross-encoder scoring service client
//!
//! An external cross-encoder may supply an alternate relevance score per
//! candidate text given a query. It is treated as unreliable: timeouts,
//! crashes, and malformed output all fall back to the local heuristic
//! rerank, never surfacing to the caller.

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pluggable scoring strategy for query/candidate pairs.
///
/// The transport (HTTP, subprocess, queue) is an implementation choice
/// behind this trait.
#[async_trait]
pub trait CrossEncoderScorer: Send + Sync {
    /// Score each candidate text against the query, in candidate order
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>>;
}

#[derive(Serialize)]
struct ScoreRequest<'a> {
    query: &'a str,
    candidates: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Deserialize)]
struct ScoreResponse {
    scores: Vec<f32>,
}

/// HTTP-backed cross-encoder client
pub struct HttpCrossEncoder {
    client: reqwest::Client,
    endpoint: String,
    model: Option<String>,
}

impl HttpCrossEncoder {
    /// Create a new client with a request timeout
    pub fn new(endpoint: String, model: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint,
            model,
        })
    }

    /// Make request with exponential-backoff retry
    async fn request_with_retry(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(100))
            .with_max_elapsed_time(Some(Duration::from_secs(2)))
            .build();

        retry(policy, || async {
            self.make_request(query, texts).await.map_err(|e| {
                tracing::warn!(error = %e, "Cross-encoder request failed, retrying");
                backoff::Error::transient(e)
            })
        })
        .await
    }

    async fn make_request(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        let request = ScoreRequest {
            query,
            candidates: texts,
            model: self.model.as_deref(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::ScorerError {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ScorerError {
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: ScoreResponse = response.json().await.map_err(|e| AppError::ScorerError {
            message: format!("Failed to parse response: {}", e),
        })?;

        Ok(result.scores)
    }
}

#[async_trait]
impl CrossEncoderScorer for HttpCrossEncoder {
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request_with_retry(query, texts).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Scorer returning a fixed score vector
    pub struct FixedScorer(pub Vec<f32>);

    #[async_trait]
    impl CrossEncoderScorer for FixedScorer {
        async fn score(&self, _query: &str, _texts: &[String]) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    /// Scorer that always fails
    pub struct DownScorer;

    #[async_trait]
    impl CrossEncoderScorer for DownScorer {
        async fn score(&self, _query: &str, _texts: &[String]) -> Result<Vec<f32>> {
            Err(AppError::ScorerError {
                message: "connection refused".into(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_input_short_circuits() {
        let scorer = HttpCrossEncoder::new(
            "http://localhost:1/score".into(),
            None,
            Duration::from_millis(50),
        )
        .unwrap();

        // No request is made for an empty batch, so an unreachable endpoint
        // still returns cleanly.
        let scores = scorer.score("query", &[]).await.unwrap();
        assert!(scores.is_empty());
    }

    #[test]
    fn test_request_serialization() {
        let texts = vec!["a".to_string(), "b".to_string()];
        let request = ScoreRequest {
            query: "q",
            candidates: &texts,
            model: Some("ce-small"),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"candidates\""));
        assert!(json.contains("ce-small"));
    }
}
