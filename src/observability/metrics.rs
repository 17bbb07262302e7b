//! Attempt and request metrics.
//!
//! # Metrics
//! - `slayer_attempts_total` (counter): transport attempts by destination, outcome
//! - `slayer_attempt_duration_seconds` (histogram): attempt latency by destination
//! - `slayer_requests_total` (counter): terminal results by destination, outcome
//! - `slayer_request_duration_seconds` (histogram): end-to-end latency
//! - `slayer_cache_lookups_total` (counter): cache hits and misses
//!
//! # Design Decisions
//! - Recording never blocks; the `metrics` facade is a no-op until a recorder
//!   is installed by the embedding application
//! - Labels are destinations and outcome labels, never full URLs

use std::time::Duration;

use crate::pipeline::request::Outcome;

/// Receives attempt and request measurements.
pub trait MetricsSink: Send + Sync {
    fn record_attempt(&self, destination: &str, outcome: &Outcome, latency: Duration);

    /// Terminal result of one `execute` call, including rejections.
    fn record_request(&self, destination: &str, outcome: &Outcome, latency: Duration);

    fn record_cache_lookup(&self, _hit: bool) {}
}

/// Sink that forwards to the global `metrics` recorder.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsFacadeSink;

impl MetricsSink for MetricsFacadeSink {
    fn record_attempt(&self, destination: &str, outcome: &Outcome, latency: Duration) {
        ::metrics::counter!(
            "slayer_attempts_total",
            "destination" => destination.to_string(),
            "outcome" => outcome.label()
        )
        .increment(1);
        ::metrics::histogram!("slayer_attempt_duration_seconds", "destination" => destination.to_string())
            .record(latency.as_secs_f64());
    }

    fn record_request(&self, destination: &str, outcome: &Outcome, latency: Duration) {
        ::metrics::counter!(
            "slayer_requests_total",
            "destination" => destination.to_string(),
            "outcome" => outcome.label()
        )
        .increment(1);
        ::metrics::histogram!("slayer_request_duration_seconds", "destination" => destination.to_string())
            .record(latency.as_secs_f64());
    }

    fn record_cache_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        ::metrics::counter!("slayer_cache_lookups_total", "result" => result).increment(1);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_attempt(&self, _destination: &str, _outcome: &Outcome, _latency: Duration) {}

    fn record_request(&self, _destination: &str, _outcome: &Outcome, _latency: Duration) {}
}
