//! Generation service abstraction
//!
//! The LLM call itself is an external collaborator: this module only defines
//! the request/response contract and an HTTP client for it. When no API key
//! is configured the client produces a deterministic local echo, which keeps
//! the in-process dispatch path testable without a network.

use crate::config::GenerationConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request handed to the generation service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The user's message
    pub query: String,

    /// Citation-annotated context window
    pub context: String,

    /// Compressed conversation history
    pub history: String,

    /// Persona description, if available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona_description: Option<String>,
}

/// Trait for answer generation
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Generate an answer grounded in the supplied context
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    query: &'a str,
    context: &'a str,
    history: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    persona: Option<&'a str>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    answer: String,
}

/// HTTP generation client
pub struct HttpGenerationClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl HttpGenerationClient {
    /// Create a client from configuration
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    /// Deterministic local response for development/testing
    fn generate_local_response(&self, request: &GenerationRequest) -> String {
        let cited = request.context.matches("[#").count();
        format!(
            "Thinking about \"{}\": drawing on {} remembered snippet(s), \
            this is how it went from my side. [Local response - generation API key not configured]",
            request.query.trim(),
            cited
        )
    }
}

#[async_trait]
impl GenerationService for HttpGenerationClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let Some(api_key) = &self.api_key else {
            return Ok(self.generate_local_response(request));
        };

        let body = GenerateBody {
            model: &self.model,
            query: &request.query,
            context: &request.context,
            history: &request.history,
            persona: request.persona_description.as_deref(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::GenerationError {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::GenerationError {
                message: format!("API error {}: {}", status, text),
            });
        }

        let parsed: GenerateResponse =
            response.json().await.map_err(|e| AppError::GenerationError {
                message: format!("Failed to parse response: {}", e),
            })?;

        Ok(parsed.answer)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_response_without_api_key() {
        let client = HttpGenerationClient::from_config(&GenerationConfig::default()).unwrap();
        let request = GenerationRequest {
            query: "how was the kyoto trip".to_string(),
            context: "[#1 score=0.900 src=wechat]\nkyoto in autumn".to_string(),
            history: String::new(),
            persona_description: None,
        };

        let answer = client.generate(&request).await.unwrap();
        assert!(answer.contains("kyoto trip"));
        assert!(answer.contains("1 remembered snippet"));
    }

    #[tokio::test]
    async fn test_local_response_deterministic() {
        let client = HttpGenerationClient::from_config(&GenerationConfig::default()).unwrap();
        let request = GenerationRequest {
            query: "q".to_string(),
            context: String::new(),
            history: String::new(),
            persona_description: None,
        };

        let a = client.generate(&request).await.unwrap();
        let b = client.generate(&request).await.unwrap();
        assert_eq!(a, b);
    }
}
