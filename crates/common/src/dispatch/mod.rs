//! Async task dispatch
//!
//! Queues long-running inference/training/rerank work to worker processes,
//! with a fallback to synchronous in-process execution when no broker is
//! configured. The dispatcher is an explicitly owned context object created
//! once at process startup and passed to callers by reference; there is no
//! module-level singleton.

mod broker;
mod handlers;
mod queue;

pub use broker::{Broker, SqsBroker};
pub use handlers::{
    InferenceHandler, InferenceJobPayload, InferenceResult, JobHandler, JobRegistry,
    RerankHandler, RerankJobPayload, TrainingHandler, TrainingJobPayload,
};
pub use queue::{JobQueue, SqsQueueConfig};

use crate::config::QueueConfig;
use crate::errors::{AppError, Result};
use crate::metrics::{record_enqueue, record_job, StageTimer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Kinds of offloaded work
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Full answer generation (rerank + compose + LLM call)
    Inference,
    /// Persona model training; resource-heavy, concurrency 1 per worker
    Training,
    /// Standalone candidate reranking
    Rerank,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Inference => "inference",
            JobKind::Training => "training",
            JobKind::Rerank => "rerank",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of offloaded work as carried on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    /// 1-based attempt counter; retries reuse the same job id
    pub attempt: u32,
    pub timeout_ms: u64,
    pub enqueued_at: DateTime<Utc>,
}

/// Completion event sent by a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReply {
    pub job_id: Uuid,
    pub outcome: JobOutcome,
}

/// Result of a job as reported by its worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Success {
        result: serde_json::Value,
    },
    Failure {
        message: String,
        /// True when the worker abandoned the job at its deadline
        #[serde(default)]
        timed_out: bool,
    },
}

/// Per-enqueue options
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Overall deadline; on expiry the work is abandoned and the caller
    /// gets a timeout error
    pub timeout_ms: Option<u64>,

    /// Attempt cap override for this job
    pub attempts: Option<u32>,
}

/// Dispatch policy knobs
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// Attempts before surfacing failure
    pub attempts: u32,

    /// Initial backoff between attempts
    pub backoff_initial: Duration,

    /// Default per-job timeout
    pub default_timeout: Duration,

    /// Drop completed job records older than this
    pub prune_age: Duration,

    /// Keep at most this many completed job records
    pub prune_max_records: usize,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            backoff_initial: Duration::from_millis(1000),
            default_timeout: Duration::from_millis(120_000),
            prune_age: Duration::from_secs(3600),
            prune_max_records: 1000,
        }
    }
}

impl DispatchPolicy {
    pub fn from_config(config: &QueueConfig, default_timeout_ms: u64) -> Self {
        Self {
            attempts: config.attempts.max(1),
            backoff_initial: Duration::from_millis(config.backoff_initial_ms),
            default_timeout: Duration::from_millis(default_timeout_ms),
            prune_age: Duration::from_secs(config.prune_age_secs),
            prune_max_records: config.prune_max_records,
        }
    }

    /// Delay before retry `attempt` (2-based: the first retry waits the
    /// initial backoff). The exponent is capped so arbitrary attempt caps
    /// cannot overflow the multiplier.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(2).min(MAX_BACKOFF_EXPONENT);
        self.backoff_initial.saturating_mul(1_u32 << exp)
    }
}

/// Doubling stops here: with the default 1s initial backoff this tops out
/// at about 18 hours, far past any practical job deadline
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Completed/failed job record, kept for inspection until pruned
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub outcome: &'static str,
    pub finished_at: DateTime<Utc>,
}

/// Async task dispatcher.
///
/// Owns the handler registry and an optional broker connection. With a
/// broker, jobs travel through named queues to worker processes; without
/// one, the registered handler runs in-process with an identical output
/// shape.
pub struct Dispatcher {
    registry: JobRegistry,
    broker: Mutex<Option<Arc<dyn Broker>>>,
    policy: DispatchPolicy,
    records: Mutex<VecDeque<JobRecord>>,
}

impl Dispatcher {
    /// Create a broker-less dispatcher (in-process execution)
    pub fn new(registry: JobRegistry, policy: DispatchPolicy) -> Self {
        Self {
            registry,
            broker: Mutex::new(None),
            policy,
            records: Mutex::new(VecDeque::new()),
        }
    }

    /// Attach a broker connection. Idempotent: returns false and leaves the
    /// existing connection untouched when one is already attached.
    pub fn connect_broker(&self, broker: Arc<dyn Broker>) -> bool {
        let mut slot = self.broker.lock().expect("broker lock poisoned");
        if slot.is_some() {
            debug!("Broker already connected, ignoring");
            return false;
        }
        *slot = Some(broker);
        info!("Broker connected");
        true
    }

    /// Whether a broker is currently attached
    pub fn has_broker(&self) -> bool {
        self.broker.lock().expect("broker lock poisoned").is_some()
    }

    /// Enqueue an inference job
    pub async fn enqueue_inference(
        &self,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<serde_json::Value> {
        self.enqueue(JobKind::Inference, payload, options).await
    }

    /// Enqueue a training job
    pub async fn enqueue_training(
        &self,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<serde_json::Value> {
        self.enqueue(JobKind::Training, payload, options).await
    }

    /// Enqueue a rerank job
    pub async fn enqueue_rerank(
        &self,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<serde_json::Value> {
        self.enqueue(JobKind::Rerank, payload, options).await
    }

    /// Completed job records not yet pruned (newest last)
    pub fn records(&self) -> Vec<JobRecord> {
        self.records
            .lock()
            .expect("records lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    async fn enqueue(
        &self,
        kind: JobKind,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<serde_json::Value> {
        let job_id = Uuid::new_v4();
        let timeout_ms = options.timeout_ms.unwrap_or(self.policy.default_timeout.as_millis() as u64);
        let timeout = Duration::from_millis(timeout_ms);
        let attempts = options.attempts.unwrap_or(self.policy.attempts).max(1);

        let broker = self
            .broker
            .lock()
            .expect("broker lock poisoned")
            .clone();
        record_enqueue(kind.as_str(), broker.is_some());

        let timer = StageTimer::start();
        let mut last_error: Option<AppError> = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                // Exponential backoff between attempts
                let delay = self.policy.backoff_delay(attempt);
                warn!(
                    job_id = %job_id,
                    kind = %kind,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying job"
                );
                tokio::time::sleep(delay).await;
            }

            let result = match &broker {
                Some(broker) => {
                    let envelope = JobEnvelope {
                        job_id,
                        kind,
                        payload: payload.clone(),
                        attempt,
                        timeout_ms,
                        enqueued_at: Utc::now(),
                    };
                    broker.submit_and_wait(&envelope, timeout).await
                }
                None => self.run_in_process(job_id, kind, payload.clone(), timeout).await,
            };

            match result {
                Ok(value) => {
                    self.record(job_id, kind, "success", timer.elapsed_secs());
                    return Ok(value);
                }
                Err(e @ AppError::DispatchTimeout { .. }) => {
                    // A timed-out job is not retried: the caller's deadline
                    // has already passed
                    self.record(job_id, kind, "timeout", timer.elapsed_secs());
                    return Err(e);
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    last_error = Some(e);
                }
                Err(e) => {
                    self.record(job_id, kind, "failure", timer.elapsed_secs());
                    return Err(e);
                }
            }
        }

        self.record(job_id, kind, "failure", timer.elapsed_secs());
        Err(last_error.unwrap_or_else(|| AppError::WorkerFailed {
            job_id: job_id.to_string(),
            message: "Exhausted attempts".to_string(),
        }))
    }

    /// Synchronous in-process fallback; output shape identical to the
    /// queued path
    async fn run_in_process(
        &self,
        job_id: Uuid,
        kind: JobKind,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        let handler = self.registry.get(kind).ok_or_else(|| AppError::Configuration {
            message: format!("No handler registered for {} jobs", kind),
        })?;

        match tokio::time::timeout(timeout, handler.handle(payload)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(AppError::WorkerFailed {
                job_id: job_id.to_string(),
                message: e.to_string(),
            }),
            // Dropping the future terminates the work
            Err(_) => Err(AppError::DispatchTimeout {
                job_id: job_id.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    fn record(&self, job_id: Uuid, kind: JobKind, outcome: &'static str, duration_secs: f64) {
        record_job(kind.as_str(), duration_secs, outcome);

        let mut records = self.records.lock().expect("records lock poisoned");
        records.push_back(JobRecord {
            job_id,
            kind,
            outcome,
            finished_at: Utc::now(),
        });

        // Prune by age, then by count
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.policy.prune_age)
                .unwrap_or_else(|_| chrono::Duration::seconds(3600));
        while matches!(records.front(), Some(r) if r.finished_at < cutoff) {
            records.pop_front();
        }
        while records.len() > self.policy.prune_max_records {
            records.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct EchoHandler;

    #[async_trait]
    impl JobHandler for EchoHandler {
        fn kind(&self) -> JobKind {
            JobKind::Rerank
        }

        async fn handle(&self, payload: serde_json::Value) -> Result<serde_json::Value> {
            Ok(serde_json::json!({ "echo": payload }))
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl JobHandler for SlowHandler {
        fn kind(&self) -> JobKind {
            JobKind::Inference
        }

        async fn handle(&self, _payload: serde_json::Value) -> Result<serde_json::Value> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(serde_json::Value::Null)
        }
    }

    struct FlakyHandler {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        fn kind(&self) -> JobKind {
            JobKind::Training
        }

        async fn handle(&self, _payload: serde_json::Value) -> Result<serde_json::Value> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.succeed_on {
                Ok(serde_json::json!({ "call": call }))
            } else {
                Err(AppError::GenerationError {
                    message: "transient".to_string(),
                })
            }
        }
    }

    struct NullBroker;

    #[async_trait]
    impl Broker for NullBroker {
        async fn submit_and_wait(
            &self,
            _envelope: &JobEnvelope,
            _timeout: Duration,
        ) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    fn quick_policy() -> DispatchPolicy {
        DispatchPolicy {
            attempts: 2,
            backoff_initial: Duration::from_millis(1),
            default_timeout: Duration::from_millis(500),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_in_process_fallback_runs_handler() {
        let mut registry = JobRegistry::new();
        registry.register(Arc::new(EchoHandler));
        let dispatcher = Dispatcher::new(registry, quick_policy());

        let result = dispatcher
            .enqueue_rerank(serde_json::json!({ "q": 1 }), JobOptions::default())
            .await
            .unwrap();
        assert_eq!(result["echo"]["q"], 1);
        assert_eq!(dispatcher.records()[0].outcome, "success");
    }

    #[tokio::test]
    async fn test_missing_handler_is_configuration_error() {
        let dispatcher = Dispatcher::new(JobRegistry::new(), quick_policy());

        let err = dispatcher
            .enqueue_inference(serde_json::Value::Null, JobOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_timeout_is_distinguishable_and_not_retried() {
        let mut registry = JobRegistry::new();
        registry.register(Arc::new(SlowHandler));
        let dispatcher = Dispatcher::new(registry, quick_policy());

        let err = dispatcher
            .enqueue_inference(
                serde_json::Value::Null,
                JobOptions {
                    timeout_ms: Some(20),
                    attempts: Some(3),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DispatchTimeout { .. }));
        // One record, outcome timeout: no retries happened
        let records = dispatcher.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, "timeout");
    }

    #[tokio::test]
    async fn test_worker_failure_retried_then_succeeds() {
        let mut registry = JobRegistry::new();
        registry.register(Arc::new(FlakyHandler {
            calls: AtomicU32::new(0),
            succeed_on: 2,
        }));
        let dispatcher = Dispatcher::new(registry, quick_policy());

        let result = dispatcher
            .enqueue_training(serde_json::Value::Null, JobOptions::default())
            .await
            .unwrap();
        assert_eq!(result["call"], 2);
    }

    #[tokio::test]
    async fn test_worker_failure_exhausts_attempts() {
        let mut registry = JobRegistry::new();
        registry.register(Arc::new(FlakyHandler {
            calls: AtomicU32::new(0),
            succeed_on: 10,
        }));
        let dispatcher = Dispatcher::new(registry, quick_policy());

        let err = dispatcher
            .enqueue_training(serde_json::Value::Null, JobOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::WorkerFailed { .. }));
        assert_eq!(dispatcher.records()[0].outcome, "failure");
    }

    #[tokio::test]
    async fn test_connect_broker_idempotent() {
        let dispatcher = Dispatcher::new(JobRegistry::new(), quick_policy());
        assert!(!dispatcher.has_broker());
        assert!(dispatcher.connect_broker(Arc::new(NullBroker)));
        assert!(!dispatcher.connect_broker(Arc::new(NullBroker)));
        assert!(dispatcher.has_broker());
    }

    #[tokio::test]
    async fn test_records_pruned_by_count() {
        let mut registry = JobRegistry::new();
        registry.register(Arc::new(EchoHandler));
        let policy = DispatchPolicy {
            prune_max_records: 3,
            ..quick_policy()
        };
        let dispatcher = Dispatcher::new(registry, policy);

        for _ in 0..5 {
            dispatcher
                .enqueue_rerank(serde_json::Value::Null, JobOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(dispatcher.records().len(), 3);
    }

    #[test]
    fn test_backoff_delay_doubles_then_caps() {
        let policy = DispatchPolicy {
            backoff_initial: Duration::from_millis(1000),
            ..Default::default()
        };
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff_delay(4), Duration::from_millis(4000));
        // Huge attempt counts no longer double, and never overflow
        assert_eq!(policy.backoff_delay(40), policy.backoff_delay(18));
        assert_eq!(policy.backoff_delay(u32::MAX), policy.backoff_delay(18));
    }

    #[test]
    fn test_envelope_round_trip() {
        let envelope = JobEnvelope {
            job_id: Uuid::new_v4(),
            kind: JobKind::Training,
            payload: serde_json::json!({ "epochs": 3 }),
            attempt: 1,
            timeout_ms: 60_000,
            enqueued_at: Utc::now(),
        };
        let json = serde_json::to_string(&envelope).unwrap();
        let parsed: JobEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.job_id, envelope.job_id);
        assert_eq!(parsed.kind, JobKind::Training);
    }
}
