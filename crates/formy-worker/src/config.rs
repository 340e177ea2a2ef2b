//! Worker configuration.

use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};
use crate::policy::RetryPolicy;
use crate::retry::RetryConfig;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of execution slots
    pub concurrency: usize,
    /// Wait between claims when the queue is empty
    pub poll_interval: Duration,
    /// Deadline for one job attempt, engine calls included
    pub job_timeout: Duration,
    /// Deadline for a single engine call
    pub engine_call_timeout: Duration,
    /// Attempts allowed before a retryable failure becomes terminal
    pub max_retries: u32,
    /// First retry delay; doubles per attempt
    pub backoff_base: Duration,
    /// Retry delay cap
    pub backoff_max: Duration,
    /// Lease age after which a processing job counts as abandoned
    pub lease_duration: Duration,
    /// How often the reclaimer scans for abandoned jobs
    pub reclaim_interval: Duration,
    /// Retries for a single store write
    pub store_retries: u32,
    /// First delay between store write retries
    pub store_retry_delay: Duration,
    /// Prometheus exporter port
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_interval: Duration::from_millis(5000),
            job_timeout: Duration::from_secs(600), // 10 minutes
            engine_call_timeout: Duration::from_secs(300),
            max_retries: 3,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
            lease_duration: Duration::from_secs(900), // 15 minutes
            reclaim_interval: Duration::from_secs(30),
            store_retries: 5,
            store_retry_delay: Duration::from_millis(200),
            metrics_port: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            concurrency: env_parse("WORKER_CONCURRENCY").unwrap_or(defaults.concurrency),
            poll_interval: env_parse("WORKER_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            job_timeout: env_parse("WORKER_JOB_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.job_timeout),
            engine_call_timeout: env_parse("ENGINE_CALL_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.engine_call_timeout),
            max_retries: env_parse("WORKER_MAX_RETRIES").unwrap_or(defaults.max_retries),
            backoff_base: env_parse("WORKER_BACKOFF_BASE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.backoff_base),
            backoff_max: env_parse("WORKER_BACKOFF_MAX_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.backoff_max),
            lease_duration: env_parse("WORKER_LEASE_DURATION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.lease_duration),
            reclaim_interval: env_parse("WORKER_RECLAIM_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reclaim_interval),
            store_retries: env_parse("WORKER_STORE_RETRIES").unwrap_or(defaults.store_retries),
            store_retry_delay: defaults.store_retry_delay,
            metrics_port: env_parse("METRICS_PORT"),
        }
    }

    /// Reject settings the worker cannot run safely with.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.concurrency == 0 {
            return Err(WorkerError::config_error("concurrency must be at least 1"));
        }
        if self.max_retries == 0 {
            return Err(WorkerError::config_error("max_retries must be at least 1"));
        }
        if self.backoff_base > self.backoff_max {
            return Err(WorkerError::config_error(format!(
                "backoff base {:?} exceeds backoff max {:?}",
                self.backoff_base, self.backoff_max
            )));
        }
        // A job still inside its deadline must never look abandoned.
        if self.lease_duration <= self.job_timeout {
            return Err(WorkerError::config_error(format!(
                "lease duration {:?} must exceed job timeout {:?}",
                self.lease_duration, self.job_timeout
            )));
        }
        if self.reclaim_interval.is_zero() || self.poll_interval.is_zero() {
            return Err(WorkerError::config_error(
                "poll and reclaim intervals must be non-zero",
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base: self.backoff_base,
            backoff_max: self.backoff_max,
        }
    }

    /// Backoff for store writes and failed claims.
    pub fn store_retry(&self, operation: &str) -> RetryConfig {
        RetryConfig::new(operation)
            .with_max_retries(self.store_retries)
            .with_base_delay(self.store_retry_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = WorkerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff_base, Duration::from_secs(5));
        assert_eq!(config.backoff_max, Duration::from_secs(300));
        assert_eq!(config.lease_duration, Duration::from_secs(900));
    }

    #[test]
    fn test_validation_rejects_unsafe_settings() {
        let zero_slots = WorkerConfig {
            concurrency: 0,
            ..WorkerConfig::default()
        };
        assert!(zero_slots.validate().is_err());

        let no_retries = WorkerConfig {
            max_retries: 0,
            ..WorkerConfig::default()
        };
        assert!(no_retries.validate().is_err());

        let inverted_backoff = WorkerConfig {
            backoff_base: Duration::from_secs(60),
            backoff_max: Duration::from_secs(10),
            ..WorkerConfig::default()
        };
        assert!(inverted_backoff.validate().is_err());

        let short_lease = WorkerConfig {
            lease_duration: Duration::from_secs(600),
            ..WorkerConfig::default()
        };
        assert!(short_lease.validate().is_err());
    }
}
