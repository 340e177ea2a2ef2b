//! Store error types.

use formy_models::{ErrorKind, JobStatus, Lease};
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Duplicate job: {0}")]
    DuplicateJob(String),

    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Lease lost for job {0}")]
    LeaseLost(String),

    #[error("Corrupt job record {job_id}: {reason}")]
    Corrupt { job_id: String, reason: String },

    /// The record exists but cannot be turned into a job. `lease` is set
    /// when the job is processing, so the holder can still fail it.
    #[error("Undecodable job record {job_id}: {reason}")]
    Undecodable {
        job_id: String,
        lease: Option<Lease>,
        reason: String,
    },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn corrupt(job_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            job_id: job_id.into(),
            reason: reason.into(),
        }
    }

    /// Classification used when a store failure ends up on a job.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::StoreError
    }

    /// Check if repeating the same store operation may succeed.
    ///
    /// Ownership and state conflicts are final: another writer has moved
    /// the job on.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::ConnectionFailed(_) | StoreError::Redis(_))
    }

    /// Check if the write was refused because the caller no longer owns the job.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::LeaseLost(_) | StoreError::InvalidTransition { .. }
        )
    }
}
