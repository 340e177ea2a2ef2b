//! Engine call metrics.

use std::time::Duration;

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Total engine calls by operation and outcome.
    pub const CALLS_TOTAL: &str = "formy_engine_calls_total";

    /// Engine call latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "formy_engine_latency_seconds";
}

/// Record metrics for a finished engine call.
pub fn record_call(operation: &str, outcome: &str, latency: Duration) {
    counter!(
        names::CALLS_TOTAL,
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "operation" => operation.to_string()
    )
    .record(latency.as_secs_f64());
}
