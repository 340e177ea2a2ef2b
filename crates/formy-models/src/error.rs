//! Error taxonomy persisted on failed jobs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classified failure kind.
///
/// The kind alone decides whether re-attempting the same job can succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Declared job type has no registered pipeline
    UnknownJobType,
    /// Required pipeline parameters missing or malformed
    InvalidParameters,
    /// Engine call or job deadline elapsed
    Timeout,
    /// Engine temporarily unavailable (5xx, connection reset)
    TransientUnavailable,
    /// Engine refused the request (4xx)
    Rejected,
    /// Attempt budget consumed by retryable failures
    RetriesExhausted,
    /// Store or queue operation failed
    StoreError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnknownJobType => "UNKNOWN_JOB_TYPE",
            ErrorKind::InvalidParameters => "INVALID_PARAMETERS",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::TransientUnavailable => "TRANSIENT_UNAVAILABLE",
            ErrorKind::Rejected => "REJECTED",
            ErrorKind::RetriesExhausted => "RETRIES_EXHAUSTED",
            ErrorKind::StoreError => "STORE_ERROR",
        }
    }

    /// Check if a failure of this kind may succeed on another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::TransientUnavailable | ErrorKind::StoreError
        )
    }

    /// User-facing message shown by the submitting system.
    pub fn message(&self) -> &'static str {
        match self {
            ErrorKind::UnknownJobType => "Unsupported edit mode",
            ErrorKind::InvalidParameters => "Invalid request parameters",
            ErrorKind::Timeout => "Processing timed out",
            ErrorKind::TransientUnavailable => "AI engine is temporarily unavailable",
            ErrorKind::Rejected => "AI engine rejected the request",
            ErrorKind::RetriesExhausted => "Processing failed after several attempts",
            ErrorKind::StoreError => "Task storage is unavailable",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured failure written to a job record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobError {
    /// Classified kind (error code)
    pub kind: ErrorKind,
    /// User-facing message for the kind
    pub message: String,
    /// Specific reason, suitable for deciding on resubmission
    pub detail: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            message: kind.message().to_string(),
            detail: detail.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}
