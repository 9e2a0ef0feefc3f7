//! Execution engine: scheduler tick plus one worker per admitted job.
//!
//! The tick requeues FAILED jobs whose cooldown has elapsed and, when no job is
//! active, claims the next PENDING job and hands it to a worker task so the
//! tick itself never blocks. The engine owns every job status transition after
//! enqueue.

mod execute;
mod progress;
mod registry;

pub use progress::{overall_percent, ProgressEvent, ProgressHub};
pub use registry::ActiveJobs;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::ChapterdConfig;
use crate::history::ChapterHistory;
use crate::rate_limit::RateLimiter;
use crate::remote::RemoteApi;
use crate::retry::JobBackoff;
use crate::runner::ProcessRunner;
use crate::store::{unix_timestamp, Job, JobId, JobStatus, QueueError, StateDb};

/// State shared between the engine handle and its workers.
struct Shared {
    db: StateDb,
    history: ChapterHistory,
    runner: ProcessRunner,
    remote: Arc<dyn RemoteApi>,
    limiter: RateLimiter,
    cfg: Arc<ChapterdConfig>,
    active: ActiveJobs,
    progress: ProgressHub,
    backoff: JobBackoff,
}

impl Shared {
    /// Publishes the job's persisted state (status changes, final errors).
    async fn publish_job(&self, job_id: JobId) {
        if let Ok(Some(job)) = self.db.get_job(job_id).await {
            self.progress.publish(ProgressEvent::from_job(&job));
        }
    }
}

/// Cloneable handle to the engine.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    pub fn new(
        db: StateDb,
        remote: Arc<dyn RemoteApi>,
        limiter: RateLimiter,
        cfg: Arc<ChapterdConfig>,
    ) -> Self {
        let shared = Shared {
            history: ChapterHistory::new(db.clone()),
            runner: ProcessRunner::new(cfg.tool.clone(), cfg.stderr_limit),
            backoff: JobBackoff::new(cfg.retry_base_interval()),
            active: ActiveJobs::new(),
            progress: ProgressHub::default(),
            db,
            remote,
            limiter,
            cfg,
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.shared.progress.subscribe()
    }

    /// Jobs currently executing, as (id, title).
    pub fn active_jobs(&self) -> Vec<(JobId, String)> {
        self.shared.active.snapshot()
    }

    pub fn is_active(&self, job_id: JobId) -> bool {
        self.shared.active.contains(job_id)
    }

    /// Resets jobs a previous process left DOWNLOADING. Call before the first tick.
    pub async fn recover(&self) -> Result<u64> {
        let n = self.shared.db.recover_interrupted_jobs().await?;
        if n > 0 {
            tracing::info!(count = n, "recovered interrupted jobs");
        }
        Ok(n)
    }

    /// One scheduler tick. Returns the id of the job started, if any.
    pub async fn tick(&self) -> Result<Option<JobId>> {
        self.requeue_due_failures().await?;
        if !self.shared.active.is_empty() {
            return Ok(None);
        }
        let Some(job) = self.shared.db.dequeue_next_pending().await? else {
            return Ok(None);
        };
        let Some(cancel) = self.shared.active.register(job.id, &job.title) else {
            return Ok(None);
        };
        if !self.shared.db.claim_pending(job.id).await? {
            // Cancelled or deleted between peek and claim.
            self.shared.active.unregister(job.id);
            return Ok(None);
        }
        let job = self
            .shared
            .db
            .get_job(job.id)
            .await?
            .context("claimed job vanished")?;
        let job_id = job.id;
        tokio::spawn(execute::execute_job(Arc::clone(&self.shared), job, cancel));
        Ok(Some(job_id))
    }

    async fn requeue_due_failures(&self) -> Result<()> {
        let now = unix_timestamp();
        for job in self.shared.db.retry_candidates().await? {
            if !self
                .shared
                .backoff
                .is_due(job.retry_count, job.max_retries, job.updated_at, now)
            {
                continue;
            }
            if self.shared.db.requeue_failed(job.id).await? {
                tracing::info!(
                    job_id = job.id,
                    retry = job.retry_count + 1,
                    max = job.max_retries,
                    "retrying failed job"
                );
                self.shared.publish_job(job.id).await;
            }
        }
        Ok(())
    }

    /// Cancels a job. An active job's subprocess is killed right away; the
    /// CANCELLED status is written without waiting for the worker.
    pub async fn cancel(&self, job_id: JobId) -> Result<Job, QueueError> {
        if self.shared.active.request_cancel(job_id) {
            self.shared.runner.cancel(job_id);
            tracing::info!(job_id, "cancelling active job");
        }
        let job = self.shared.db.set_status(job_id, JobStatus::Cancelled).await?;
        self.shared.progress.publish(ProgressEvent::from_job(&job));
        Ok(job)
    }

    /// Removes a job; an active job's subprocess is killed first. Subscribers
    /// get a final event marked `removed`.
    pub async fn delete(&self, job_id: JobId) -> Result<bool, QueueError> {
        if self.shared.active.request_cancel(job_id) {
            self.shared.runner.kill(job_id);
            tracing::info!(job_id, "deleting active job");
        }
        let last = self.shared.db.get_job(job_id).await?;
        let removed = self.shared.db.remove_job(job_id).await?;
        if let (true, Some(job)) = (removed, last) {
            self.shared.progress.publish(ProgressEvent::removed(&job));
        }
        Ok(removed)
    }

    /// Manual retry: FAILED → PENDING with the retry counter reset.
    pub async fn retry(&self, job_id: JobId) -> Result<Job, QueueError> {
        let job = self.shared.db.set_status(job_id, JobStatus::Pending).await?;
        self.shared.progress.publish(ProgressEvent::from_job(&job));
        Ok(job)
    }

    /// Drains the registry and kills every live subprocess. Jobs stay
    /// DOWNLOADING and are recovered on the next start.
    pub fn shutdown(&self) {
        let drained = self.shared.active.drain();
        let killed = self.shared.runner.kill_all();
        if !drained.is_empty() {
            tracing::info!(jobs = ?drained, killed, "engine shut down with active jobs");
        }
    }

    /// Recovers, then ticks every `tick_interval` until `stop` is cancelled.
    pub async fn run(&self, stop: CancellationToken) -> Result<()> {
        self.recover().await?;
        let mut interval = tokio::time::interval(self.shared.cfg.tick_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            tick_secs = self.shared.cfg.tick_interval().as_secs(),
            "engine started"
        );
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::error!("scheduler tick: {e:#}");
                    }
                }
            }
        }
        self.shutdown();
        Ok(())
    }

    /// Waits until no job is active or `timeout` elapses. Returns true if idle.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.shared.active.is_empty() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }
}
