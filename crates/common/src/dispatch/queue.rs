//! SQS queue wrapper for job transport
//!
//! Thin client over a named SQS queue: JSON message serialization,
//! long-poll receive, and explicit deletion after successful processing.

use crate::errors::{AppError, Result};
use aws_sdk_sqs::Client as SqsClient;
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

/// SQS queue configuration
#[derive(Debug, Clone)]
pub struct SqsQueueConfig {
    /// Queue URL
    pub url: String,
    /// Visibility timeout in seconds
    pub visibility_timeout: i32,
    /// Wait time for long polling (seconds)
    pub wait_time_seconds: i32,
    /// Maximum number of messages per poll
    pub max_messages: i32,
}

impl Default for SqsQueueConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            visibility_timeout: 300,
            wait_time_seconds: 20,
            max_messages: 10,
        }
    }
}

/// SQS queue client wrapper
#[derive(Clone)]
pub struct JobQueue {
    client: SqsClient,
    config: SqsQueueConfig,
}

impl JobQueue {
    /// Create a new queue client from ambient AWS configuration
    pub async fn new(config: SqsQueueConfig) -> Result<Self> {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = SqsClient::new(&aws_config);

        Ok(Self { client, config })
    }

    /// Create with an existing SQS client
    pub fn with_client(client: SqsClient, config: SqsQueueConfig) -> Self {
        Self { client, config }
    }

    /// Queue URL this client is bound to
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Send a JSON message to the queue
    pub async fn send<T: Serialize>(&self, message: &T) -> Result<String> {
        let body = serde_json::to_string(message).map_err(|e| AppError::QueueError {
            message: format!("Failed to serialize message: {}", e),
        })?;

        let result = self
            .client
            .send_message()
            .queue_url(&self.config.url)
            .message_body(&body)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to send message: {}", e),
            })?;

        let message_id = result.message_id.unwrap_or_default();
        debug!(message_id = %message_id, queue = %self.config.url, "Message sent to queue");

        Ok(message_id)
    }

    /// Receive and parse messages; returns (payload, receipt handle) pairs.
    ///
    /// Messages whose body fails to parse are deleted and skipped: a
    /// malformed message would otherwise redeliver forever.
    pub async fn receive<T: DeserializeOwned>(&self) -> Result<Vec<(T, String)>> {
        let result = self
            .client
            .receive_message()
            .queue_url(&self.config.url)
            .max_number_of_messages(self.config.max_messages)
            .visibility_timeout(self.config.visibility_timeout)
            .wait_time_seconds(self.config.wait_time_seconds)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to receive messages: {}", e),
            })?;

        let messages = result.messages.unwrap_or_default();
        debug!(count = messages.len(), queue = %self.config.url, "Received messages");

        let mut parsed = Vec::with_capacity(messages.len());
        for message in messages {
            let receipt = message.receipt_handle.clone().unwrap_or_default();
            let Some(body) = message.body.as_ref() else {
                continue;
            };
            match serde_json::from_str::<T>(body) {
                Ok(value) => parsed.push((value, receipt)),
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping unparseable queue message");
                    if !receipt.is_empty() {
                        let _ = self.delete(&receipt).await;
                    }
                }
            }
        }

        Ok(parsed)
    }

    /// Delete a message after processing
    pub async fn delete(&self, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.config.url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to delete message: {}", e),
            })?;

        debug!("Message deleted from queue");
        Ok(())
    }

    /// Change visibility timeout (extend processing time for a long job)
    pub async fn extend_visibility(&self, receipt_handle: &str, additional_seconds: i32) -> Result<()> {
        self.client
            .change_message_visibility()
            .queue_url(&self.config.url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(additional_seconds)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to extend visibility: {}", e),
            })?;

        debug!(additional_seconds, "Extended message visibility");
        Ok(())
    }
}
