//! Progress reporting into the task store.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use formy_models::{JobId, Lease};
use formy_pipeline::ProgressReporter;
use formy_queue::TaskStore;

/// Writes pipeline progress onto the job record under the attempt's lease.
///
/// Failures are logged and dropped; progress never fails a job.
pub struct StoreProgress {
    store: Arc<dyn TaskStore>,
    job_id: JobId,
    lease: Lease,
}

impl StoreProgress {
    pub fn new(store: Arc<dyn TaskStore>, job_id: JobId, lease: Lease) -> Self {
        Self {
            store,
            job_id,
            lease,
        }
    }
}

#[async_trait]
impl ProgressReporter for StoreProgress {
    async fn report(&self, progress: u8, step: &str) {
        if let Err(e) = self
            .store
            .report_progress(&self.job_id, &self.lease, progress, step)
            .await
        {
            debug!(job_id = %self.job_id, progress, step, "Progress update dropped: {}", e);
        }
    }
}
