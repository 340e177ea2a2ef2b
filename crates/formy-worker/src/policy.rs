//! Job retry policy.
//!
//! Decides what happens to a job after an attempt: completion, a delayed
//! re-enqueue, or a terminal failure. The attempt count comes from the
//! store record and is never inferred from queue redeliveries.

use std::time::Duration;

use formy_models::{ErrorKind, JobError, JobResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

/// What to do with a job after an attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Complete(JobResult),
    Retry { delay: Duration, error: JobError },
    Fail(JobError),
}

impl RetryPolicy {
    /// Delay before attempt `attempt_count + 1`: `base * 2^(attempt_count - 1)`, capped.
    pub fn delay_for_attempt(&self, attempt_count: u32) -> Duration {
        let exponent = attempt_count.saturating_sub(1);
        let factor = 2u32.saturating_pow(exponent);
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }

    pub fn decide(&self, attempt_count: u32, outcome: Result<JobResult, JobError>) -> Decision {
        let error = match outcome {
            Ok(result) => return Decision::Complete(result),
            Err(error) => error,
        };

        if !error.is_retryable() {
            return Decision::Fail(error);
        }

        if attempt_count < self.max_retries {
            Decision::Retry {
                delay: self.delay_for_attempt(attempt_count),
                error,
            }
        } else {
            Decision::Fail(JobError::new(
                ErrorKind::RetriesExhausted,
                format!("{attempt_count} attempts failed; last error: {error}"),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }

    #[test]
    fn test_backoff_curve() {
        let policy = policy();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(20));
        assert_eq!(policy.delay_for_attempt(7), Duration::from_secs(300));
        assert_eq!(policy.delay_for_attempt(64), Duration::from_secs(300));
    }

    #[test]
    fn test_success_completes() {
        let decision = policy().decide(1, Ok(JobResult::new("/out.png")));
        assert_eq!(decision, Decision::Complete(JobResult::new("/out.png")));
    }

    #[test]
    fn test_retryable_failure_is_requeued_until_budget_spent() {
        let policy = policy();
        let timeout = JobError::new(ErrorKind::Timeout, "transfer_pose timed out");

        match policy.decide(2, Err(timeout.clone())) {
            Decision::Retry { delay, error } => {
                assert_eq!(delay, Duration::from_secs(10));
                assert_eq!(error.kind, ErrorKind::Timeout);
            }
            other => panic!("expected retry, got {other:?}"),
        }

        match policy.decide(3, Err(timeout)) {
            Decision::Fail(error) => {
                assert_eq!(error.kind, ErrorKind::RetriesExhausted);
                assert!(error.detail.contains("TIMEOUT"));
                assert!(error.detail.contains("transfer_pose timed out"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_non_retryable_fails_on_first_attempt() {
        for kind in [
            ErrorKind::Rejected,
            ErrorKind::InvalidParameters,
            ErrorKind::UnknownJobType,
        ] {
            match policy().decide(1, Err(JobError::new(kind, "nope"))) {
                Decision::Fail(error) => assert_eq!(error.kind, kind),
                other => panic!("expected failure, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_store_errors_are_retried() {
        let decision = policy().decide(1, Err(JobError::new(ErrorKind::StoreError, "redis down")));
        assert!(matches!(decision, Decision::Retry { .. }));
    }
}
