//! Job executor.
//!
//! Runs a fixed number of slot tasks that claim and process jobs one at a
//! time, plus a reclaimer that recovers jobs whose worker went away. All of
//! them stop claiming as soon as the shutdown channel flips; a job already
//! being processed runs to completion or to its deadline.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

use formy_models::{ErrorKind, Job, JobError, JobId, JobResult, Lease};
use formy_pipeline::PipelineContext;
use formy_queue::{JobUpdate, StoreError, UpdateOutcome};

use crate::context::WorkerContext;
use crate::error::WorkerResult;
use crate::logging::JobLogger;
use crate::metrics;
use crate::policy::Decision;
use crate::progress::StoreProgress;
use crate::retry::{retry_async, FailureTracker, RetryResult};

/// Consecutive store failures logged per slot before suppression.
const MAX_LOGGED_STORE_FAILURES: u32 = 3;

/// Job executor that processes jobs from the task store.
pub struct JobExecutor {
    ctx: Arc<WorkerContext>,
}

impl JobExecutor {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    /// Run until `shutdown` carries `true`, then wait for every slot to finish.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> WorkerResult<()> {
        self.ctx.config.validate()?;

        info!(
            concurrency = self.ctx.config.concurrency,
            store = self.ctx.store.backend(),
            "Starting job executor"
        );

        let mut slots = Vec::with_capacity(self.ctx.config.concurrency);
        for slot in 0..self.ctx.config.concurrency {
            slots.push(tokio::spawn(Self::slot_loop(
                Arc::clone(&self.ctx),
                slot,
                shutdown.clone(),
            )));
        }
        let reclaimer = tokio::spawn(Self::reclaim_loop(Arc::clone(&self.ctx), shutdown));

        for handle in slots {
            if let Err(e) = handle.await {
                error!("Worker slot task failed: {}", e);
            }
        }
        if let Err(e) = reclaimer.await {
            error!("Reclaimer task failed: {}", e);
        }

        info!("Job executor stopped");
        Ok(())
    }

    async fn slot_loop(ctx: Arc<WorkerContext>, slot: usize, mut shutdown: watch::Receiver<bool>) {
        debug!(slot, "Worker slot started");
        let claim_backoff = ctx.config.store_retry("claim_next");
        let mut failures = FailureTracker::new(MAX_LOGGED_STORE_FAILURES);

        loop {
            if *shutdown.borrow() {
                break;
            }

            match ctx.store.claim_next().await {
                Ok(Some(job)) => {
                    failures.record_success();
                    Self::execute_job(&ctx, job).await;
                }
                Ok(None) => {
                    failures.record_success();
                    if wait_or_shutdown(&mut shutdown, ctx.config.poll_interval).await {
                        break;
                    }
                }
                Err(StoreError::Undecodable {
                    job_id,
                    lease: Some(lease),
                    reason,
                }) => {
                    failures.record_success();
                    Self::fail_undecodable(&ctx, JobId::from_string(job_id), lease, reason).await;
                }
                Err(e) => {
                    if failures.record_failure() {
                        warn!(slot, "Failed to claim job: {}", e);
                    }
                    let delay = claim_backoff.delay_for_attempt(failures.failure_count() - 1);
                    if wait_or_shutdown(&mut shutdown, delay).await {
                        break;
                    }
                }
            }
        }

        debug!(slot, "Worker slot stopped");
    }

    async fn reclaim_loop(ctx: Arc<WorkerContext>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(ctx.config.reclaim_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut failures = FailureTracker::new(MAX_LOGGED_STORE_FAILURES);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    match ctx.store.reclaim_stale(ctx.config.lease_duration).await {
                        Ok(job_ids) => {
                            failures.record_success();
                            if !job_ids.is_empty() {
                                info!("Reclaimed {} stale jobs", job_ids.len());
                                metrics::record_reclaimed(job_ids.len());
                            }
                            for job_id in job_ids {
                                Self::recover_reclaimed(&ctx, job_id).await;
                            }
                        }
                        Err(e) => {
                            if failures.record_failure() {
                                warn!("Failed to reclaim stale jobs: {}", e);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Treat an abandoned attempt as a retryable timeout.
    async fn recover_reclaimed(ctx: &WorkerContext, job_id: JobId) {
        let job = match ctx.store.get(&job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id = %job_id, "Reclaimed job no longer exists");
                return;
            }
            Err(StoreError::Undecodable {
                lease: Some(lease),
                reason,
                ..
            }) => {
                Self::fail_undecodable(ctx, job_id, lease, reason).await;
                return;
            }
            Err(e) => {
                // Still leased; the next scan picks it up again once this lease expires.
                warn!(job_id = %job_id, "Failed to load reclaimed job: {}", e);
                return;
            }
        };
        let Some(lease) = job.lease.clone() else {
            warn!(job_id = %job_id, "Reclaimed job has no lease");
            return;
        };

        let logger = JobLogger::new(&job);
        let error = JobError::new(ErrorKind::Timeout, "lease expired");
        let decision = ctx.config.retry_policy().decide(job.attempt_count, Err(error));
        Self::apply_decision(ctx, &job, &lease, &logger, decision)
            .instrument(logger.create_span())
            .await;
    }

    /// Fail a claimed job whose record cannot be read. Retrying cannot fix it.
    async fn fail_undecodable(ctx: &WorkerContext, job_id: JobId, lease: Lease, reason: String) {
        let logger = JobLogger::from_id(&job_id);
        let error = JobError::new(
            ErrorKind::InvalidParameters,
            format!("job record could not be decoded: {reason}"),
        );

        async {
            metrics::record_failed(logger.job_type(), error.kind);
            logger.log_failure(&error);
            Self::finish(ctx, &job_id, &lease, &logger, JobUpdate::Failed(error)).await;
        }
        .instrument(logger.create_span())
        .await
    }

    /// Process one claimed job and persist the outcome.
    async fn execute_job(ctx: &WorkerContext, job: Job) {
        let logger = JobLogger::new(&job);
        let span = logger.create_span();

        async {
            let Some(lease) = job.lease.clone() else {
                error!(job_id = %job.id, "Claimed job has no lease; skipping");
                return;
            };

            metrics::record_claimed(&job.job_type);
            logger.log_start();

            let started = Instant::now();
            let outcome = Self::run_pipeline(ctx, &job, &lease).await;
            if outcome.is_ok() {
                metrics::record_completed(&job.job_type, started.elapsed());
            }

            let decision = ctx.config.retry_policy().decide(job.attempt_count, outcome);
            Self::apply_decision(ctx, &job, &lease, &logger, decision).await;
        }
        .instrument(span)
        .await
    }

    async fn run_pipeline(ctx: &WorkerContext, job: &Job, lease: &Lease) -> Result<JobResult, JobError> {
        let pipeline = ctx
            .registry
            .resolve(&job.job_type)
            .map_err(|e| e.to_job_error())?;
        pipeline
            .validate(&job.parameters)
            .map_err(|e| e.to_job_error())?;

        let job_timeout = ctx.config.job_timeout;
        let progress = StoreProgress::new(Arc::clone(&ctx.store), job.id.clone(), lease.clone());
        let pipeline_ctx = PipelineContext::new(
            job.id.clone(),
            Arc::clone(&ctx.engine),
            Instant::now() + job_timeout,
            ctx.config.engine_call_timeout,
        )
        .with_progress(Arc::new(progress));

        match tokio::time::timeout(job_timeout, pipeline.process(&job.parameters, &pipeline_ctx)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(e.to_job_error()),
            Err(_) => Err(JobError::new(
                ErrorKind::Timeout,
                format!("job exceeded deadline of {}s", job_timeout.as_secs_f64()),
            )),
        }
    }

    async fn apply_decision(
        ctx: &WorkerContext,
        job: &Job,
        lease: &Lease,
        logger: &JobLogger,
        decision: Decision,
    ) {
        match decision {
            Decision::Complete(result) => {
                let output = result.output_image.clone();
                if Self::finish(ctx, &job.id, lease, logger, JobUpdate::Succeeded(result)).await {
                    logger.log_completion(&output);
                }
            }
            Decision::Retry { delay, error } => {
                metrics::record_retried(&job.job_type, error.kind);
                logger.log_retry(&error, delay);

                let config = ctx.config.store_retry("requeue");
                let result = retry_async(&config, StoreError::is_retryable, move || {
                    ctx.store.requeue(&job.id, lease, delay, error.clone())
                })
                .await;
                Self::report_write_failure(logger, "requeue", result);
            }
            Decision::Fail(error) => {
                metrics::record_failed(&job.job_type, error.kind);
                logger.log_failure(&error);
                Self::finish(ctx, &job.id, lease, logger, JobUpdate::Failed(error)).await;
            }
        }
    }

    /// Write a terminal status and acknowledge. Returns whether the write applied.
    async fn finish(
        ctx: &WorkerContext,
        job_id: &JobId,
        lease: &Lease,
        logger: &JobLogger,
        update: JobUpdate,
    ) -> bool {
        let config = ctx.config.store_retry("update");
        let result = retry_async(&config, StoreError::is_retryable, move || {
            ctx.store.update(job_id, lease, update.clone())
        })
        .await;

        let applied = match result {
            RetryResult::Success(UpdateOutcome::Applied) => true,
            RetryResult::Success(UpdateOutcome::Unchanged) => {
                debug!(job_id = %job_id, "Terminal status already recorded");
                true
            }
            failed => {
                Self::report_write_failure(logger, "update", failed);
                return false;
            }
        };

        let config = ctx.config.store_retry("acknowledge");
        let result = retry_async(&config, StoreError::is_retryable, move || {
            ctx.store.acknowledge(job_id)
        })
        .await;
        Self::report_write_failure(logger, "acknowledge", result);

        applied
    }

    fn report_write_failure<T>(
        logger: &JobLogger,
        operation: &'static str,
        result: RetryResult<T, StoreError>,
    ) {
        let RetryResult::Failed { error, attempts } = result else {
            return;
        };

        metrics::record_store_write_failure(operation);
        if error.is_conflict() {
            logger.log_warning(&format!(
                "{operation} refused, another worker owns the job: {error}"
            ));
        } else {
            // The job stays processing; the reclaimer recovers it once the lease expires.
            error!(
                job_id = %logger.job_id(),
                operation,
                attempts,
                "Store write failed: {}", error
            );
        }
    }
}

/// Sleep for `delay` unless shutdown arrives first. Returns `true` on shutdown.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
