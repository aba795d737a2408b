//! Worker job processor
//!
//! Executes job envelopes against the handler registry, bounded by
//! per-kind concurrency limits, and publishes completion events to the
//! reply queue.

use echoself_common::dispatch::{
    JobEnvelope, JobKind, JobOutcome, JobQueue, JobRegistry, JobReply,
};
use echoself_common::errors::{AppError, Result};
use echoself_common::metrics::{record_job, StageTimer};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, instrument, warn};

/// Job processor configuration
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Concurrency cap for inference and rerank jobs
    pub max_concurrency: usize,
}

impl ProcessorConfig {
    /// Cap from configuration, bounded by the host's available CPUs
    pub fn for_host(configured_max: usize) -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            max_concurrency: configured_max.min(parallelism).max(1),
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self { max_concurrency: 4 }
    }
}

/// Executes envelopes and reports outcomes
pub struct JobProcessor {
    registry: Arc<JobRegistry>,
    reply_queue: JobQueue,
    limits: HashMap<JobKind, Arc<Semaphore>>,
}

impl JobProcessor {
    pub fn new(registry: Arc<JobRegistry>, reply_queue: JobQueue, config: ProcessorConfig) -> Self {
        let shared = config.max_concurrency.max(1);

        let mut limits = HashMap::new();
        limits.insert(JobKind::Inference, Arc::new(Semaphore::new(shared)));
        limits.insert(JobKind::Rerank, Arc::new(Semaphore::new(shared)));
        // Training saturates the host; one at a time
        limits.insert(JobKind::Training, Arc::new(Semaphore::new(1)));

        Self {
            registry,
            reply_queue,
            limits,
        }
    }

    /// Execute one envelope and send its reply.
    ///
    /// Handler errors and timeouts become `Failure` replies rather than
    /// processor errors: the dispatcher owns retry policy, the worker just
    /// reports what happened.
    #[instrument(skip(self, envelope), fields(job_id = %envelope.job_id, kind = %envelope.kind))]
    pub async fn process(&self, envelope: JobEnvelope) -> Result<()> {
        let outcome = self.execute(&envelope).await;
        let label = outcome_label(&outcome);

        let reply = JobReply {
            job_id: envelope.job_id,
            outcome,
        };

        self.reply_queue.send(&reply).await?;
        info!(outcome = label, "Job reply sent");
        Ok(())
    }

    async fn execute(&self, envelope: &JobEnvelope) -> JobOutcome {
        let Some(handler) = self.registry.get(envelope.kind) else {
            return JobOutcome::Failure {
                message: format!("No handler registered for {} jobs", envelope.kind),
                timed_out: false,
            };
        };

        let Some(limit) = self.limits.get(&envelope.kind) else {
            return JobOutcome::Failure {
                message: format!("No concurrency limit for {} jobs", envelope.kind),
                timed_out: false,
            };
        };

        let _permit = match limit.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return JobOutcome::Failure {
                    message: "Concurrency limiter closed".to_string(),
                    timed_out: false,
                }
            }
        };

        let timer = StageTimer::start();
        let budget = Duration::from_millis(envelope.timeout_ms);
        let result = tokio::time::timeout(budget, handler.handle(envelope.payload.clone())).await;

        let outcome = match result {
            Ok(Ok(value)) => JobOutcome::Success { result: value },
            Ok(Err(e)) => {
                warn!(error = %e, attempt = envelope.attempt, "Job handler failed");
                JobOutcome::Failure {
                    message: failure_message(&e),
                    timed_out: false,
                }
            }
            Err(_) => {
                error!(timeout_ms = envelope.timeout_ms, "Job timed out");
                JobOutcome::Failure {
                    message: format!("Timed out after {}ms", envelope.timeout_ms),
                    timed_out: true,
                }
            }
        };

        record_job(envelope.kind.as_str(), timer.elapsed_secs(), outcome_label(&outcome));
        outcome
    }
}

/// Metrics/log label for an outcome
pub fn outcome_label(outcome: &JobOutcome) -> &'static str {
    match outcome {
        JobOutcome::Success { .. } => "success",
        JobOutcome::Failure { timed_out: true, .. } => "timeout",
        JobOutcome::Failure { .. } => "failure",
    }
}

/// Map handler errors into a reply-safe message, keeping the error code
pub fn failure_message(error: &AppError) -> String {
    format!("[{}] {}", error.code().as_code(), error)
}
