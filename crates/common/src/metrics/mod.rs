//! Metrics and observability utilities
//!
//! Provides metrics for the retrieval pipeline and the job dispatcher
//! with standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all EchoSelf metrics
pub const METRICS_PREFIX: &str = "echoself";

/// Histogram buckets for pipeline latency (in seconds)
pub const PIPELINE_BUCKETS: &[f64] = &[
    0.001, // 1ms
    0.005, // 5ms
    0.010, // 10ms
    0.025, // 25ms
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
];

/// Buckets for dispatched job latency (inference/training run long)
pub const JOB_BUCKETS: &[f64] = &[
    0.100,  // 100ms
    0.500,  // 500ms
    1.000,  // 1s
    5.000,  // 5s
    15.00,  // 15s
    60.00,  // 1m
    300.0,  // 5m
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Rerank metrics
    describe_counter!(
        format!("{}_rerank_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of rerank requests"
    );

    describe_counter!(
        format!("{}_rerank_degraded_total", METRICS_PREFIX),
        Unit::Count,
        "Rerank requests that took a degraded path"
    );

    describe_histogram!(
        format!("{}_rerank_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Rerank latency in seconds"
    );

    // Compose metrics
    describe_counter!(
        format!("{}_compose_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of context composition requests"
    );

    describe_gauge!(
        format!("{}_compose_snippets_count", METRICS_PREFIX),
        Unit::Count,
        "Snippets included in the last composed context"
    );

    // Dispatch metrics
    describe_counter!(
        format!("{}_jobs_enqueued_total", METRICS_PREFIX),
        Unit::Count,
        "Total jobs enqueued"
    );

    describe_counter!(
        format!("{}_jobs_processed_total", METRICS_PREFIX),
        Unit::Count,
        "Total jobs processed by workers"
    );

    describe_counter!(
        format!("{}_jobs_timed_out_total", METRICS_PREFIX),
        Unit::Count,
        "Total jobs that hit their timeout"
    );

    describe_histogram!(
        format!("{}_job_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Job execution latency in seconds"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record rerank metrics
pub fn record_rerank(duration_secs: f64, candidate_count: usize, degraded: bool) {
    counter!(
        format!("{}_rerank_requests_total", METRICS_PREFIX),
        "candidates" => bucket_label(candidate_count)
    )
    .increment(1);

    if degraded {
        counter!(format!("{}_rerank_degraded_total", METRICS_PREFIX)).increment(1);
    }

    histogram!(format!("{}_rerank_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Helper to record compose metrics
pub fn record_compose(snippet_count: usize) {
    counter!(format!("{}_compose_requests_total", METRICS_PREFIX)).increment(1);
    gauge!(format!("{}_compose_snippets_count", METRICS_PREFIX)).set(snippet_count as f64);
}

/// Helper to record job outcomes
pub fn record_job(kind: &str, duration_secs: f64, outcome: &str) {
    counter!(
        format!("{}_jobs_processed_total", METRICS_PREFIX),
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    if outcome == "timeout" {
        counter!(
            format!("{}_jobs_timed_out_total", METRICS_PREFIX),
            "kind" => kind.to_string()
        )
        .increment(1);
    }

    histogram!(
        format!("{}_job_duration_seconds", METRICS_PREFIX),
        "kind" => kind.to_string()
    )
    .record(duration_secs);
}

/// Helper to record enqueue events
pub fn record_enqueue(kind: &str, queued: bool) {
    let path = if queued { "broker" } else { "in_process" };
    counter!(
        format!("{}_jobs_enqueued_total", METRICS_PREFIX),
        "kind" => kind.to_string(),
        "path" => path.to_string()
    )
    .increment(1);
}

/// Timer helper for pipeline stages
pub struct StageTimer {
    start: Instant,
}

impl StageTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

fn bucket_label(count: usize) -> String {
    match count {
        0 => "0",
        1..=10 => "1-10",
        11..=50 => "11-50",
        _ => "50+",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_sorted() {
        let mut prev = 0.0;
        for &bucket in PIPELINE_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
    }

    #[test]
    fn test_record_helpers_run() {
        record_rerank(0.002, 12, false);
        record_compose(4);
        record_job("rerank", 0.1, "success");
        record_enqueue("inference", false);
    }
}
