//! Per-job execution context handed to pipelines.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use formy_engine::{EngineClient, EngineRequest, EngineResponse};
use formy_models::{ErrorKind, JobId};

use crate::error::{PipelineError, PipelineResult};

/// Receives best-effort progress updates from a running pipeline.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, progress: u8, step: &str);
}

/// Reporter that drops every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

#[async_trait]
impl ProgressReporter for NoopProgress {
    async fn report(&self, _progress: u8, _step: &str) {}
}

/// Everything a pipeline needs while processing one job.
///
/// Engine calls made through [`PipelineContext::call`] run strictly in the
/// order they are awaited and each is bounded by the smaller of the
/// per-call timeout and the time left before the job deadline.
pub struct PipelineContext {
    job_id: JobId,
    engine: Arc<dyn EngineClient>,
    deadline: Instant,
    call_timeout: Duration,
    progress: Arc<dyn ProgressReporter>,
}

impl PipelineContext {
    pub fn new(
        job_id: JobId,
        engine: Arc<dyn EngineClient>,
        deadline: Instant,
        call_timeout: Duration,
    ) -> Self {
        Self {
            job_id,
            engine,
            deadline,
            call_timeout,
            progress: Arc::new(NoopProgress),
        }
    }

    /// Attach a progress reporter.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Time left before the job deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Issue one engine call.
    pub async fn call(&self, operation: &str, payload: Value) -> PipelineResult<EngineResponse> {
        let remaining = self.remaining();
        if remaining.is_zero() {
            return Err(PipelineError::new(
                ErrorKind::Timeout,
                format!("job deadline elapsed before engine call '{operation}'"),
            ));
        }

        let deadline = remaining.min(self.call_timeout);
        debug!(job_id = %self.job_id, operation, ?deadline, "Invoking engine");

        let response = self
            .engine
            .invoke(EngineRequest::new(operation, payload, deadline))
            .await?;
        Ok(response)
    }

    /// Report progress; failures are the reporter's concern.
    pub async fn report(&self, progress: u8, step: &str) {
        self.progress.report(progress.min(100), step).await;
    }
}
