//! Broker abstraction over the job transport
//!
//! The dispatcher talks to workers through this trait: submit a job envelope
//! to its kind's queue and block on the matching completion event. The SQS
//! implementation pairs per-kind job queues with a shared reply queue and a
//! router task that delivers replies to waiting callers by job id.

use super::queue::JobQueue;
use super::{JobEnvelope, JobKind, JobOutcome, JobReply};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Async job transport contract.
///
/// Implementations must guarantee single-consumer-per-job delivery; the
/// dispatcher relies on that for the no-concurrent-mutation invariant.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Submit an envelope and wait for its completion event.
    ///
    /// Resolves with the worker's result value, `AppError::WorkerFailed`
    /// when the worker reported an error, or `AppError::DispatchTimeout`
    /// when no reply arrived within `timeout`.
    async fn submit_and_wait(
        &self,
        envelope: &JobEnvelope,
        timeout: Duration,
    ) -> Result<serde_json::Value>;
}

type PendingMap = Arc<Mutex<HashMap<Uuid, oneshot::Sender<JobReply>>>>;

/// SQS-backed broker: one job queue per kind, one shared reply queue
pub struct SqsBroker {
    queues: HashMap<JobKind, JobQueue>,
    reply_queue: JobQueue,
    pending: PendingMap,
    router_started: AtomicBool,
}

impl SqsBroker {
    /// Create a broker over pre-built queues and start its reply router.
    ///
    /// Must be called from within a tokio runtime; the router task polls the
    /// reply queue for the lifetime of the process.
    pub fn new(queues: HashMap<JobKind, JobQueue>, reply_queue: JobQueue) -> Arc<Self> {
        let broker = Arc::new(Self {
            queues,
            reply_queue,
            pending: Arc::new(Mutex::new(HashMap::new())),
            router_started: AtomicBool::new(false),
        });
        broker.start_router();
        broker
    }

    /// Start the reply router task. Idempotent: returns false and does
    /// nothing when the router is already running.
    pub fn start_router(self: &Arc<Self>) -> bool {
        if self.router_started.swap(true, Ordering::SeqCst) {
            debug!("Reply router already running");
            return false;
        }

        let reply_queue = self.reply_queue.clone();
        let pending = Arc::clone(&self.pending);

        tokio::spawn(async move {
            loop {
                match reply_queue.receive::<JobReply>().await {
                    Ok(replies) => {
                        for (reply, receipt) in replies {
                            if let Err(e) = reply_queue.delete(&receipt).await {
                                error!(error = %e, "Failed to delete reply message");
                            }
                            Self::deliver(&pending, reply);
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Reply queue receive failed");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        true
    }

    /// Hand a reply to its waiting caller; false when nobody is waiting
    fn deliver(pending: &PendingMap, reply: JobReply) -> bool {
        let sender = pending
            .lock()
            .expect("pending lock poisoned")
            .remove(&reply.job_id);
        match sender {
            Some(tx) => {
                let _ = tx.send(reply);
                true
            }
            None => {
                // Reply for a caller that already timed out or a job from
                // another process
                warn!(job_id = %reply.job_id, "Unmatched job reply");
                false
            }
        }
    }

    fn register(&self, job_id: Uuid) -> oneshot::Receiver<JobReply> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .insert(job_id, tx);
        rx
    }

    fn unregister(&self, job_id: Uuid) {
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .remove(&job_id);
    }
}

#[async_trait]
impl Broker for SqsBroker {
    async fn submit_and_wait(
        &self,
        envelope: &JobEnvelope,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        let queue = self.queues.get(&envelope.kind).ok_or_else(|| {
            AppError::Configuration {
                message: format!("No queue configured for {} jobs", envelope.kind),
            }
        })?;

        // Register before submit so the reply cannot race the waiter
        let rx = self.register(envelope.job_id);

        if let Err(e) = queue.send(envelope).await {
            self.unregister(envelope.job_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => match reply.outcome {
                JobOutcome::Success { result } => Ok(result),
                // Worker hit the job's deadline: same terminal semantics as
                // a dispatcher-side wait timeout
                JobOutcome::Failure {
                    timed_out: true, ..
                } => Err(AppError::DispatchTimeout {
                    job_id: envelope.job_id.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
                JobOutcome::Failure { message, .. } => Err(AppError::WorkerFailed {
                    job_id: envelope.job_id.to_string(),
                    message,
                }),
            },
            Ok(Err(_)) => {
                self.unregister(envelope.job_id);
                Err(AppError::Internal {
                    message: "Reply channel closed".to_string(),
                })
            }
            Err(_) => {
                self.unregister(envelope.job_id);
                Err(AppError::DispatchTimeout {
                    job_id: envelope.job_id.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::queue::SqsQueueConfig;
    use super::*;
    use aws_sdk_sqs::config::{BehaviorVersion, Credentials, Region};

    fn test_queue(url: &str) -> JobQueue {
        // Client bound to an unreachable endpoint; these tests never need a
        // live queue
        let conf = aws_sdk_sqs::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new("test", "test", None, None, "static"))
            .endpoint_url("http://localhost:1")
            .build();
        JobQueue::with_client(
            aws_sdk_sqs::Client::from_conf(conf),
            SqsQueueConfig {
                url: url.to_string(),
                ..Default::default()
            },
        )
    }

    fn test_broker() -> Arc<SqsBroker> {
        SqsBroker::new(HashMap::new(), test_queue("https://sqs.example/reply"))
    }

    #[tokio::test]
    async fn test_new_starts_router() {
        let broker = test_broker();
        // Already running from the constructor
        assert!(!broker.start_router());
    }

    #[tokio::test]
    async fn test_delivered_reply_resolves_waiter() {
        let broker = test_broker();
        let job_id = Uuid::new_v4();
        let rx = broker.register(job_id);

        let delivered = SqsBroker::deliver(
            &broker.pending,
            JobReply {
                job_id,
                outcome: JobOutcome::Success {
                    result: serde_json::json!({ "ok": true }),
                },
            },
        );
        assert!(delivered);

        let reply = rx.await.unwrap();
        assert_eq!(reply.job_id, job_id);
        assert!(matches!(reply.outcome, JobOutcome::Success { .. }));
    }

    #[tokio::test]
    async fn test_unmatched_reply_is_dropped() {
        let broker = test_broker();
        let delivered = SqsBroker::deliver(
            &broker.pending,
            JobReply {
                job_id: Uuid::new_v4(),
                outcome: JobOutcome::Failure {
                    message: "boom".to_string(),
                    timed_out: false,
                },
            },
        );
        assert!(!delivered);
    }

    #[tokio::test]
    async fn test_timeout_unregisters_waiter() {
        let broker = test_broker();
        let job_id = Uuid::new_v4();
        let _rx = broker.register(job_id);
        broker.unregister(job_id);
        assert!(broker.pending.lock().unwrap().is_empty());
    }
}
