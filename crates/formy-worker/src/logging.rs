//! Structured logging.
//!
//! Subscriber setup for the binaries and a per-job logger that keeps the
//! job id, type and attempt on every lifecycle line.

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use formy_models::{Job, JobError, JobId};

/// Initialize tracing: JSON when `LOG_FORMAT=json`, coloured text otherwise.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,formy=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    job_type: String,
    attempt: u32,
}

impl JobLogger {
    /// Create a logger for a claimed job.
    pub fn new(job: &Job) -> Self {
        Self {
            job_id: job.id.to_string(),
            job_type: job.job_type.clone(),
            attempt: job.attempt_count,
        }
    }

    /// Create a logger for a job whose record could not be read.
    pub fn from_id(job_id: &JobId) -> Self {
        Self {
            job_id: job_id.to_string(),
            job_type: "unknown".to_string(),
            attempt: 0,
        }
    }

    pub fn log_start(&self) {
        info!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            attempt = self.attempt,
            "Job started"
        );
    }

    pub fn log_retry(&self, error: &JobError, delay: std::time::Duration) {
        warn!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            attempt = self.attempt,
            error_kind = %error.kind,
            retry_in_ms = delay.as_millis() as u64,
            "Job attempt failed, requeued: {}", error.detail
        );
    }

    pub fn log_failure(&self, error: &JobError) {
        error!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            attempt = self.attempt,
            error_kind = %error.kind,
            "Job failed: {}", error.detail
        );
    }

    pub fn log_completion(&self, output: &str) {
        info!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            attempt = self.attempt,
            output = %output,
            "Job completed"
        );
    }

    /// Log a persistence problem for this job.
    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            "Job warning: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            job_type = %self.job_type,
            attempt = self.attempt
        )
    }
}
