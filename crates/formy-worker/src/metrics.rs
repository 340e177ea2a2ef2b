//! Worker metrics.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use formy_models::{ErrorKind, JobType};

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_CLAIMED_TOTAL: &str = "formy_jobs_claimed_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "formy_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "formy_jobs_failed_total";
    pub const JOBS_RETRIED_TOTAL: &str = "formy_jobs_retried_total";
    pub const JOBS_RECLAIMED_TOTAL: &str = "formy_jobs_reclaimed_total";
    pub const JOB_DURATION_SECONDS: &str = "formy_job_duration_seconds";
    pub const STORE_WRITE_FAILURES_TOTAL: &str = "formy_store_write_failures_total";
}

/// Start the Prometheus exporter on `port`.
pub fn install_exporter(port: u16) -> WorkerResult<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::MetricsError(e.to_string()))?;
    info!(%addr, "Prometheus exporter listening");
    Ok(())
}

/// Label value for a submitted job type. Unknown types share one series.
pub fn job_type_label(job_type: &str) -> &'static str {
    job_type
        .parse::<JobType>()
        .map(|t| t.as_str())
        .unwrap_or("unknown")
}

pub fn record_claimed(job_type: &str) {
    counter!(names::JOBS_CLAIMED_TOTAL, "job_type" => job_type_label(job_type)).increment(1);
}

pub fn record_completed(job_type: &str, elapsed: Duration) {
    counter!(names::JOBS_COMPLETED_TOTAL, "job_type" => job_type_label(job_type)).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "job_type" => job_type_label(job_type))
        .record(elapsed.as_secs_f64());
}

pub fn record_failed(job_type: &str, kind: ErrorKind) {
    counter!(
        names::JOBS_FAILED_TOTAL,
        "job_type" => job_type_label(job_type),
        "kind" => kind.as_str()
    )
    .increment(1);
}

pub fn record_retried(job_type: &str, kind: ErrorKind) {
    counter!(
        names::JOBS_RETRIED_TOTAL,
        "job_type" => job_type_label(job_type),
        "kind" => kind.as_str()
    )
    .increment(1);
}

pub fn record_reclaimed(count: usize) {
    counter!(names::JOBS_RECLAIMED_TOTAL).increment(count as u64);
}

pub fn record_store_write_failure(operation: &'static str) {
    counter!(names::STORE_WRITE_FAILURES_TOTAL, "operation" => operation).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_type_label_is_bounded() {
        assert_eq!(job_type_label("pose_change"), "pose_change");
        assert_eq!(job_type_label("BACKGROUND_CHANGE"), "background_replace");
        assert_eq!(job_type_label("upscale"), "unknown");
        assert_eq!(job_type_label("../../etc/passwd"), "unknown");
    }
}
