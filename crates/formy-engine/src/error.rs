//! Engine client error types.

use std::time::Duration;

use formy_models::ErrorKind;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine call '{operation}' timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Engine unavailable: {0}")]
    TransientUnavailable(String),

    #[error("Engine rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The engine accepted the work but reported that running it failed.
    #[error("Engine workflow failed: {0}")]
    WorkflowFailed(String),

    #[error("Invalid engine response: {0}")]
    InvalidResponse(String),

    #[error("Client configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::TransientUnavailable(msg.into())
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Classify into the shared error taxonomy.
    ///
    /// A response the client cannot interpret will not improve on retry, so
    /// it is treated like an engine rejection.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Timeout { .. } => ErrorKind::Timeout,
            EngineError::TransientUnavailable(_) => ErrorKind::TransientUnavailable,
            EngineError::Rejected { .. }
            | EngineError::WorkflowFailed(_)
            | EngineError::InvalidResponse(_)
            | EngineError::Config(_) => ErrorKind::Rejected,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Classify a transport-level reqwest failure.
    pub(crate) fn from_transport(operation: &str, deadline: Duration, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(operation, deadline)
        } else if err.is_decode() {
            Self::invalid_response(err.to_string())
        } else if err.is_builder() {
            Self::Config(err.to_string())
        } else {
            // connect, reset, body stream errors
            Self::unavailable(err.to_string())
        }
    }
}
