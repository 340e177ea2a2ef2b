//! The task store contract.
//!
//! A store owns durable job state and the ready queue. Every operation that
//! changes a job's status is atomic with respect to other workers, and every
//! write made on behalf of a running attempt carries that attempt's
//! [`Lease`]. Writes with a stale lease are refused with
//! [`StoreError::LeaseLost`](crate::StoreError::LeaseLost).

use std::time::Duration;

use async_trait::async_trait;
use formy_models::{Job, JobError, JobId, JobResult, JobStatus, Lease, NewJob};

use crate::error::StoreResult;

/// Terminal write for a processing job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    Succeeded(JobResult),
    Failed(JobError),
}

impl JobUpdate {
    /// Status the job ends in.
    pub fn status(&self) -> JobStatus {
        match self {
            JobUpdate::Succeeded(_) => JobStatus::Succeeded,
            JobUpdate::Failed(_) => JobStatus::Failed,
        }
    }
}

/// Whether a terminal write changed the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The job moved to the requested terminal status.
    Applied,
    /// The job was already in that terminal status.
    Unchanged,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new queued job and make it claimable. Duplicate ids are refused.
    async fn enqueue(&self, job: NewJob) -> StoreResult<JobId>;

    /// Atomically take the next ready job.
    ///
    /// The returned job is already `Processing` with its attempt count
    /// incremented and a fresh lease; no other claimer can observe it as ready.
    /// A claimed record that cannot be decoded comes back as
    /// [`StoreError::Undecodable`](crate::StoreError::Undecodable) with the new lease.
    async fn claim_next(&self) -> StoreResult<Option<Job>>;

    /// Write a terminal status. Repeating the same terminal status is a no-op.
    async fn update(
        &self,
        job_id: &JobId,
        lease: &Lease,
        update: JobUpdate,
    ) -> StoreResult<UpdateOutcome>;

    /// Put a processing job back on the queue after `delay`, recording the
    /// failure that caused it. The attempt count is kept.
    async fn requeue(
        &self,
        job_id: &JobId,
        lease: &Lease,
        delay: Duration,
        error: JobError,
    ) -> StoreResult<()>;

    /// Drop the job from the in-flight set. Idempotent.
    async fn acknowledge(&self, job_id: &JobId) -> StoreResult<()>;

    /// Re-lease every job whose lease is older than `lease_duration`.
    ///
    /// Each stale job is handed to exactly one caller, which then holds the
    /// new lease.
    async fn reclaim_stale(&self, lease_duration: Duration) -> StoreResult<Vec<JobId>>;

    /// Record best-effort progress for a processing job.
    async fn report_progress(
        &self,
        job_id: &JobId,
        lease: &Lease,
        progress: u8,
        step: &str,
    ) -> StoreResult<()>;

    /// Load a job. A record that cannot be decoded fails with
    /// [`StoreError::Undecodable`](crate::StoreError::Undecodable).
    async fn get(&self, job_id: &JobId) -> StoreResult<Option<Job>>;

    /// Verify the backing store is reachable.
    async fn health_check(&self) -> StoreResult<()>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}
