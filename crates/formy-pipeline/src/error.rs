//! Pipeline error types.

use formy_engine::EngineError;
use formy_models::{ErrorKind, JobError};
use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Classified pipeline failure.
///
/// Engine failures keep their classification unchanged; pipelines do not
/// retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn invalid_parameters(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParameters, detail)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Convert into the record written to the job.
    pub fn to_job_error(&self) -> JobError {
        JobError::new(self.kind, self.detail.clone())
    }
}

impl From<EngineError> for PipelineError {
    fn from(err: EngineError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// Registry lookup failure; the only error the registry produces.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no pipeline registered for job type '{0}'")]
    UnknownJobType(String),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::UnknownJobType
    }

    pub fn to_job_error(&self) -> JobError {
        JobError::new(self.kind(), self.to_string())
    }
}
