//! EchoSelf Worker
//!
//! Processes persona jobs from SQS queues:
//! 1. Receives job envelopes from the per-kind queues
//! 2. Executes the matching handler (inference, rerank, training)
//! 3. Publishes completion events to the reply queue

mod processor;

use crate::processor::{JobProcessor, ProcessorConfig};
use echoself_common::{
    config::AppConfig,
    dispatch::{
        InferenceHandler, JobEnvelope, JobKind, JobQueue, JobRegistry, RerankHandler,
        SqsQueueConfig, TrainingHandler,
    },
    generation::{GenerationService, HttpGenerationClient},
    metrics::register_metrics,
    rerank::{CrossEncoderScorer, HttpCrossEncoder, Reranker},
    store::{InMemoryStore, StoreAccessor},
    VERSION,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing::{error, info, warn, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    // Initialize tracing
    let level: Level = config
        .observability
        .log_level
        .parse()
        .unwrap_or(Level::INFO);
    if config.observability.json_logging {
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(true)
            .init();
    }

    info!("Starting EchoSelf Worker v{}", VERSION);

    // Metrics endpoint
    if config.observability.metrics_port > 0 {
        let addr = ([0, 0, 0, 0], config.observability.metrics_port);
        if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
            warn!(error = %e, "Failed to install metrics exporter, continuing without");
        }
    }
    register_metrics();

    let config = Arc::new(config);

    // Build the pipeline shared by all handlers
    let store: Arc<dyn StoreAccessor> = Arc::new(InMemoryStore::new());

    let mut reranker = Reranker::new(Arc::clone(&store));
    if let Some(endpoint) = &config.scorer.endpoint {
        let scorer: Arc<dyn CrossEncoderScorer> = Arc::new(HttpCrossEncoder::new(
            endpoint.clone(),
            config.scorer.model.clone(),
            config.scorer_timeout(),
        )?);
        reranker = reranker.with_scorer(scorer, config.scorer.blend_weight);
        info!(endpoint = %endpoint, "Cross-encoder scorer attached");
    }
    let reranker = Arc::new(reranker);

    let generation: Arc<dyn GenerationService> =
        Arc::new(HttpGenerationClient::from_config(&config.generation)?);
    info!(model = %generation.model_name(), "Generation client initialized");

    let mut registry = JobRegistry::new();
    registry.register(Arc::new(RerankHandler::new(Arc::clone(&reranker))));
    registry.register(Arc::new(InferenceHandler::new(
        Arc::clone(&store),
        Arc::clone(&reranker),
        Arc::clone(&generation),
    )));
    registry.register(Arc::new(TrainingHandler::from_config(&config.generation)?));
    let registry = Arc::new(registry);

    // Reply queue is mandatory in service mode
    let Some(reply_url) = config.queue.reply_queue_url.clone() else {
        warn!("No reply queue configured, waiting for shutdown signal...");
        tokio::signal::ctrl_c().await?;
        info!("Worker shutting down");
        return Ok(());
    };

    let reply_queue = JobQueue::new(queue_config(&config, reply_url)).await?;
    let processor = Arc::new(JobProcessor::new(
        Arc::clone(&registry),
        reply_queue,
        ProcessorConfig::for_host(config.worker.max_concurrency),
    ));

    // One poll task per configured job queue
    let bindings = [
        (JobKind::Inference, config.queue.inference_queue_url.clone()),
        (JobKind::Rerank, config.queue.rerank_queue_url.clone()),
        (JobKind::Training, config.queue.training_queue_url.clone()),
    ];

    let mut poll_tasks = Vec::new();
    for (kind, url) in bindings {
        let Some(url) = url else {
            continue;
        };
        info!(kind = %kind, url = %url, "Connecting to job queue...");
        let queue = JobQueue::new(queue_config(&config, url)).await?;
        poll_tasks.push(tokio::spawn(poll_queue(
            kind,
            queue,
            Arc::clone(&processor),
        )));
    }

    if poll_tasks.is_empty() {
        warn!("No job queues configured, waiting for shutdown signal...");
        tokio::signal::ctrl_c().await?;
        info!("Worker shutting down");
        return Ok(());
    }

    info!(queues = poll_tasks.len(), "Worker ready, polling queues");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    for task in poll_tasks {
        task.abort();
    }

    info!("Worker shutting down");
    Ok(())
}

fn queue_config(config: &AppConfig, url: String) -> SqsQueueConfig {
    SqsQueueConfig {
        url,
        visibility_timeout: config.queue.visibility_timeout_secs as i32,
        wait_time_seconds: config.queue.poll_timeout_secs as i32,
        ..Default::default()
    }
}

/// Poll one queue until the task is aborted.
///
/// Each envelope runs on its own task; the processor's per-kind semaphores
/// bound how many execute at once. A consecutive-failure circuit breaker
/// pauses polling when the queue itself misbehaves repeatedly.
async fn poll_queue(kind: JobKind, queue: JobQueue, processor: Arc<JobProcessor>) {
    let mut consecutive_failures = 0u32;
    const MAX_FAILURES: u32 = 5;
    const CIRCUIT_BREAK_DURATION: std::time::Duration = std::time::Duration::from_secs(30);

    loop {
        if consecutive_failures >= MAX_FAILURES {
            warn!(
                kind = %kind,
                failures = consecutive_failures,
                "Circuit breaker open, pausing..."
            );
            tokio::time::sleep(CIRCUIT_BREAK_DURATION).await;
            consecutive_failures = 0;
            info!(kind = %kind, "Circuit breaker reset, resuming...");
        }

        match queue.receive::<JobEnvelope>().await {
            Ok(messages) => {
                consecutive_failures = 0;
                for (envelope, receipt_handle) in messages {
                    if envelope.kind != kind {
                        warn!(
                            job_id = %envelope.job_id,
                            expected = %kind,
                            actual = %envelope.kind,
                            "Envelope on wrong queue, processing anyway"
                        );
                    }
                    info!(
                        job_id = %envelope.job_id,
                        attempt = envelope.attempt,
                        "Received job"
                    );

                    let queue = queue.clone();
                    let processor = Arc::clone(&processor);
                    tokio::spawn(async move {
                        match processor.process(envelope).await {
                            Ok(()) => {
                                // Delete message on success
                                if let Err(e) = queue.delete(&receipt_handle).await {
                                    error!(error = %e, "Failed to delete message");
                                }
                            }
                            Err(e) => {
                                error!(error = %e, "Failed to process job");
                                // Message will be re-delivered after
                                // visibility timeout
                            }
                        }
                    });
                }
            }
            Err(e) => {
                consecutive_failures += 1;
                error!(kind = %kind, error = %e, "Failed to receive messages from queue");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        }
    }
}
