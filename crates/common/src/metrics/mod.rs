//! Metrics and observability utilities
//!
//! Provides Prometheus metric names with SLO-aligned histograms for the
//! retrieval pipeline. Recording goes through the `metrics` facade, so these
//! helpers are no-ops until a binary installs an exporter.

use crate::embeddings::CircuitState;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all KAS metrics
pub const METRICS_PREFIX: &str = "kas";

/// SLO-aligned histogram buckets for search latency (in seconds)
/// Targets: P50 < 50ms, P99 < 150ms
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001,  // 1ms
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms - P50 target
    0.075,  // 75ms
    0.100,  // 100ms
    0.150,  // 150ms - P99 target
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
];

/// Buckets for embedding latency (typically slower)
pub const EMBEDDING_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
];

fn name(suffix: &str) -> String {
    format!("{}_{}", METRICS_PREFIX, suffix)
}

/// Register all metric descriptions
pub fn register_metrics() {
    // Search metrics
    describe_counter!(name("search_queries_total"), Unit::Count, "Total number of hybrid searches");
    describe_histogram!(
        name("search_duration_seconds"),
        Unit::Seconds,
        "Hybrid search latency in seconds"
    );
    describe_counter!(
        name("search_degraded_total"),
        Unit::Count,
        "Searches answered without the vector channel"
    );

    // Chunking metrics
    describe_counter!(name("chunks_created_total"), Unit::Count, "Total chunks created");

    // Embedding metrics
    describe_counter!(
        name("embedding_requests_total"),
        Unit::Count,
        "Total embedding provider requests"
    );
    describe_histogram!(
        name("embedding_duration_seconds"),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );
    describe_counter!(name("embedding_errors_total"), Unit::Count, "Total embedding provider errors");
    describe_counter!(name("embedding_retries_total"), Unit::Count, "Embedding attempts that were retried");

    describe_gauge!(
        name("circuit_breaker_state"),
        "Circuit state per breaker (0 closed, 1 half-open, 2 open)"
    );
    describe_counter!(
        name("circuit_breaker_failures_total"),
        Unit::Count,
        "Failures recorded by circuit breakers"
    );

    // Cache metrics
    describe_counter!(name("cache_hits_total"), Unit::Count, "Total cache hits");
    describe_counter!(name("cache_misses_total"), Unit::Count, "Total cache misses");
    describe_counter!(name("cache_errors_total"), Unit::Count, "Cache operations absorbed as errors");

    // Rerank / multi-hop / QA metrics
    describe_histogram!(name("rerank_duration_seconds"), Unit::Seconds, "Rerank latency in seconds");
    describe_histogram!(
        name("multihop_sub_queries"),
        Unit::Count,
        "Sub-queries produced per decomposed query"
    );
    describe_histogram!(name("qa_confidence"), Unit::Count, "Confidence score of answered questions");

    tracing::info!("Metrics registered");
}

/// Times one pipeline stage into a `*_duration_seconds` histogram
pub struct OperationTimer {
    start: Instant,
    metric: &'static str,
    label: String,
}

impl OperationTimer {
    /// Start timing; `metric` is the suffix after the prefix, e.g. `rerank_duration_seconds`
    pub fn start(metric: &'static str, label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            metric,
            label: label.into(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Record the elapsed time and return it in seconds
    pub fn finish(self) -> f64 {
        let duration = self.elapsed_secs();
        histogram!(name(self.metric), "op" => self.label).record(duration);
        duration
    }
}

/// Helper to record search metrics
pub fn record_search(duration_secs: f64, mode: &str, result_count: usize, degraded: bool) {
    counter!(name("search_queries_total"), "mode" => mode.to_string()).increment(1);

    histogram!(name("search_duration_seconds"), "mode" => mode.to_string()).record(duration_secs);

    gauge!(name("search_results_count"), "mode" => mode.to_string()).set(result_count as f64);

    if degraded {
        counter!(name("search_degraded_total")).increment(1);
    }
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        name("embedding_requests_total"),
        "model" => model.to_string(),
        "status" => status
    )
    .increment(1);

    if success {
        histogram!(name("embedding_duration_seconds"), "model" => model.to_string())
            .record(duration_secs);
    } else {
        counter!(name("embedding_errors_total"), "model" => model.to_string()).increment(1);
    }
}

/// Helper to record a retried embedding attempt
pub fn record_embedding_retry(model: &str) {
    counter!(name("embedding_retries_total"), "model" => model.to_string()).increment(1);
}

/// Helper to publish a circuit breaker transition
pub fn record_circuit_state(circuit: &str, state: CircuitState) {
    let level = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!(name("circuit_breaker_state"), "circuit" => circuit.to_string()).set(level);
}

/// Helper to count a failure seen by a circuit breaker
pub fn record_circuit_failure(circuit: &str) {
    counter!(name("circuit_breaker_failures_total"), "circuit" => circuit.to_string()).increment(1);
}

/// Outcome of a single cache lookup or write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
    Error,
}

/// Helper to record cache metrics
pub fn record_cache(outcome: CacheOutcome, category: &str) {
    let metric = match outcome {
        CacheOutcome::Hit => "cache_hits_total",
        CacheOutcome::Miss => "cache_misses_total",
        CacheOutcome::Error => "cache_errors_total",
    };
    counter!(name(metric), "category" => category.to_string()).increment(1);
}

/// Helper to record chunking output
pub fn record_chunks(strategy: &str, chunks_created: usize) {
    counter!(name("chunks_created_total"), "strategy" => strategy.to_string())
        .increment(chunks_created as u64);
}

/// Helper to record multi-hop fan-out width
pub fn record_multihop(sub_queries: usize) {
    histogram!(name("multihop_sub_queries")).record(sub_queries as f64);
}

/// Helper to record answer confidence
pub fn record_qa_confidence(level: &str, score: f64) {
    histogram!(name("qa_confidence"), "level" => level.to_string()).record(score);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets() {
        // Verify buckets are sorted and contain SLO targets
        let mut prev = 0.0;
        for &bucket in LATENCY_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }

        assert!(LATENCY_BUCKETS.contains(&0.050));
        assert!(LATENCY_BUCKETS.contains(&0.150));
        assert!(EMBEDDING_BUCKETS.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_helpers_without_recorder() {
        let timer = OperationTimer::start("rerank_duration_seconds", "test");
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.finish() >= 0.005);

        record_search(0.01, "hybrid", 3, false);
        record_cache(CacheOutcome::Error, "search");
        record_embedding(0.2, "mock", false);
    }
}
