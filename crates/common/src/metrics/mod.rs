//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Achievo metrics
pub const METRICS_PREFIX: &str = "achievo";

/// SLO-aligned histogram buckets for request latency (in seconds)
/// Targets: P50 < 50ms, P99 < 250ms
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001,  // 1ms
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms - P50 target
    0.100,  // 100ms
    0.250,  // 250ms - P99 target
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Workflow metrics
    describe_counter!(
        format!("{}_transitions_total", METRICS_PREFIX),
        Unit::Count,
        "Achievement status transitions by outcome"
    );

    describe_counter!(
        format!("{}_compensations_total", METRICS_PREFIX),
        Unit::Count,
        "Cross-store compensating writes by outcome"
    );

    // Notification metrics
    describe_counter!(
        format!("{}_notifications_total", METRICS_PREFIX),
        Unit::Count,
        "Notifications dispatched by kind and outcome"
    );

    // Statistics metrics
    describe_histogram!(
        format!("{}_statistics_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Statistics aggregation latency in seconds"
    );

    describe_counter!(
        format!("{}_statistics_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Statistics reports computed"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record an attempted status transition
pub fn record_transition(from: &str, to: &str, success: bool) {
    let outcome = if success { "success" } else { "rejected" };

    counter!(
        format!("{}_transitions_total", METRICS_PREFIX),
        "from" => from.to_string(),
        "to" => to.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a compensating write
pub fn record_compensation(operation: &str, success: bool) {
    let outcome = if success { "success" } else { "failed" };

    counter!(
        format!("{}_compensations_total", METRICS_PREFIX),
        "operation" => operation.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a notification dispatch attempt
pub fn record_notification(kind: &str, outcome: &str) {
    counter!(
        format!("{}_notifications_total", METRICS_PREFIX),
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a statistics computation
pub fn record_statistics(duration_secs: f64, scope: &str, analysed: usize) {
    counter!(
        format!("{}_statistics_requests_total", METRICS_PREFIX),
        "scope" => scope.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_statistics_duration_seconds", METRICS_PREFIX),
        "scope" => scope.to_string()
    )
    .record(duration_secs);

    tracing::debug!(scope, analysed, duration_secs, "Statistics computed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets() {
        let mut prev = 0.0;
        for &bucket in LATENCY_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }

        assert!(LATENCY_BUCKETS.contains(&0.050));
        assert!(LATENCY_BUCKETS.contains(&0.250));
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: every helper must be a no-op
        let metrics = RequestMetrics::start("POST", "/api/v1/achievements");
        metrics.finish(201);
        record_transition("draft", "submitted", true);
        record_compensation("submit", false);
        record_notification("achievement_submitted", "skipped");
        record_statistics(0.01, "all", 3);
    }
}
