//! In-process task store.
//!
//! Same semantics as the Redis store behind a single async mutex. Used by
//! tests and by `STORE_BACKEND=memory` for local runs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use formy_models::{Job, JobError, JobId, JobStatus, Lease, NewJob};

use crate::error::{StoreError, StoreResult};
use crate::store::{JobUpdate, TaskStore, UpdateOutcome};

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, Job>,
    /// Ready queue ordered by ready-at, then insertion order
    ready: BTreeMap<(DateTime<Utc>, u64), JobId>,
    inflight: HashSet<JobId>,
    seq: u64,
}

impl State {
    fn push_ready(&mut self, job_id: JobId, ready_at: DateTime<Utc>) {
        self.seq += 1;
        self.ready.insert((ready_at, self.seq), job_id);
    }

    /// Fetch a job for a leased write that moves it to `to`.
    fn leased_mut(&mut self, job_id: &JobId, lease: &Lease, to: JobStatus) -> StoreResult<&mut Job> {
        let job = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;

        if !job.status.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                job_id: job_id.to_string(),
                from: job.status,
                to,
            });
        }
        if !job.holds_lease(&lease.token) {
            return Err(StoreError::LeaseLost(job_id.to_string()));
        }
        Ok(job)
    }
}

#[derive(Default)]
pub struct MemoryTaskStore {
    state: Mutex<State>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs waiting in the ready queue, including delayed ones.
    pub async fn ready_len(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    pub async fn inflight_len(&self) -> usize {
        self.state.lock().await.inflight.len()
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn enqueue(&self, new_job: NewJob) -> StoreResult<JobId> {
        let mut state = self.state.lock().await;
        if state.jobs.contains_key(&new_job.id) {
            return Err(StoreError::DuplicateJob(new_job.id.to_string()));
        }

        let now = Utc::now();
        let job = Job::from_new(new_job, now);
        let job_id = job.id.clone();
        state.jobs.insert(job_id.clone(), job);
        state.push_ready(job_id.clone(), now);

        debug!(job_id = %job_id, "Enqueued job");
        Ok(job_id)
    }

    async fn claim_next(&self) -> StoreResult<Option<Job>> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = Utc::now();

        loop {
            let Some((&key, _)) = state.ready.iter().next() else {
                return Ok(None);
            };
            if key.0 > now {
                return Ok(None);
            }
            let Some(job_id) = state.ready.remove(&key) else {
                return Ok(None);
            };

            // Entries whose job moved on are dropped.
            let Some(job) = state.jobs.get_mut(&job_id) else {
                continue;
            };
            if !job.status.can_transition_to(JobStatus::Processing) {
                continue;
            }

            job.status = JobStatus::Processing;
            job.attempt_count += 1;
            job.lease = Some(Lease::new(now));
            job.progress = 0;
            job.current_step = None;
            job.updated_at = now;
            let claimed = job.clone();

            state.inflight.insert(job_id);
            return Ok(Some(claimed));
        }
    }

    async fn update(
        &self,
        job_id: &JobId,
        lease: &Lease,
        update: JobUpdate,
    ) -> StoreResult<UpdateOutcome> {
        let mut state = self.state.lock().await;
        let to = update.status();

        if let Some(job) = state.jobs.get(job_id) {
            if job.status == to {
                return Ok(UpdateOutcome::Unchanged);
            }
        }

        let job = state.leased_mut(job_id, lease, to)?;
        match update {
            JobUpdate::Succeeded(result) => {
                job.result = Some(result);
                job.progress = 100;
            }
            JobUpdate::Failed(error) => job.error = Some(error),
        }
        job.status = to;
        job.lease = None;
        job.updated_at = Utc::now();

        Ok(UpdateOutcome::Applied)
    }

    async fn requeue(
        &self,
        job_id: &JobId,
        lease: &Lease,
        delay: Duration,
        error: JobError,
    ) -> StoreResult<()> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = Utc::now();

        let job = state.leased_mut(job_id, lease, JobStatus::Queued)?;
        job.status = JobStatus::Queued;
        job.last_error = Some(error);
        job.lease = None;
        job.updated_at = now;

        state.inflight.remove(job_id);
        state.push_ready(job_id.clone(), now + to_chrono(delay));
        Ok(())
    }

    async fn acknowledge(&self, job_id: &JobId) -> StoreResult<()> {
        self.state.lock().await.inflight.remove(job_id);
        Ok(())
    }

    async fn reclaim_stale(&self, lease_duration: Duration) -> StoreResult<Vec<JobId>> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = Utc::now();
        let threshold = to_chrono(lease_duration);

        let inflight: Vec<JobId> = state.inflight.iter().cloned().collect();
        let mut reclaimed = Vec::new();

        for job_id in inflight {
            let Some(job) = state.jobs.get_mut(&job_id) else {
                state.inflight.remove(&job_id);
                continue;
            };
            if job.status != JobStatus::Processing {
                state.inflight.remove(&job_id);
                continue;
            }

            let expired = job
                .lease
                .as_ref()
                .map_or(true, |lease| lease.is_expired(threshold, now));
            if expired {
                job.lease = Some(Lease::new(now));
                job.updated_at = now;
                reclaimed.push(job_id);
            }
        }

        Ok(reclaimed)
    }

    async fn report_progress(
        &self,
        job_id: &JobId,
        lease: &Lease,
        progress: u8,
        step: &str,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;

        // Progress keeps the status, so there is no transition to check.
        if job.status != JobStatus::Processing {
            return Err(StoreError::InvalidTransition {
                job_id: job_id.to_string(),
                from: job.status,
                to: JobStatus::Processing,
            });
        }
        if !job.holds_lease(&lease.token) {
            return Err(StoreError::LeaseLost(job_id.to_string()));
        }
        job.progress = progress.min(100);
        job.current_step = Some(step.to_string());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> StoreResult<Option<Job>> {
        Ok(self.state.lock().await.jobs.get(job_id).cloned())
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
