//! Chapter checker: compares each followed title's remote chapter count with
//! the history store and queues a job for titles that are behind.
//!
//! Titles are checked concurrently (bounded by a semaphore); remote calls go
//! through the shared rate limiter inside the [`RemoteApi`] client. A failing
//! title is recorded and skipped; it never aborts the batch.

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::ChapterdConfig;
use crate::history::ChapterHistory;
use crate::remote::RemoteApi;
use crate::store::{FollowEntry, JobId, JobOrigin, NewJob, QueueError, StateDb};

/// Priority of follow-driven jobs; manual requests default to sooner.
pub const FOLLOW_PRIORITY: i64 = 10;

/// Result of checking one followed title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TitleOutcome {
    UpToDate,
    Enqueued(JobId),
    /// An equivalent job is already queued, running, failed, or completed
    /// since the remote count last changed.
    AlreadyQueued(JobId),
    Error(String),
}

/// One title's check failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckError {
    pub title: String,
    pub source_url: String,
    pub error: String,
}

/// Aggregate of one checker run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckSummary {
    pub checked: u32,
    pub up_to_date: u32,
    pub enqueued: u32,
    pub already_queued: u32,
    pub errors: Vec<CheckError>,
    pub duration: Duration,
}

impl CheckSummary {
    fn add(&mut self, follow: &FollowEntry, outcome: TitleOutcome) {
        self.checked += 1;
        match outcome {
            TitleOutcome::UpToDate => self.up_to_date += 1,
            TitleOutcome::Enqueued(_) => self.enqueued += 1,
            TitleOutcome::AlreadyQueued(_) => self.already_queued += 1,
            TitleOutcome::Error(error) => self.errors.push(CheckError {
                title: follow.title.clone(),
                source_url: follow.source_url.clone(),
                error,
            }),
        }
    }
}

impl std::fmt::Display for CheckSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "checked {} titles in {:.1}s: {} up to date, {} queued, {} already queued, {} errors",
            self.checked,
            self.duration.as_secs_f64(),
            self.up_to_date,
            self.enqueued,
            self.already_queued,
            self.errors.len()
        )
    }
}

#[derive(Clone)]
pub struct ChapterChecker {
    db: StateDb,
    history: ChapterHistory,
    remote: Arc<dyn RemoteApi>,
    cfg: Arc<ChapterdConfig>,
}

impl ChapterChecker {
    pub fn new(db: StateDb, remote: Arc<dyn RemoteApi>, cfg: Arc<ChapterdConfig>) -> Self {
        Self {
            history: ChapterHistory::new(db.clone()),
            db,
            remote,
            cfg,
        }
    }

    /// Checks every followed title and queues jobs for those behind the remote.
    pub async fn check_and_queue_new_chapters(&self) -> Result<CheckSummary> {
        let started = Instant::now();
        let follows = self.db.list_follows().await?;
        let semaphore = Arc::new(Semaphore::new(self.cfg.check_concurrency.max(1)));
        let mut join_set = JoinSet::new();

        for follow in follows {
            let checker = self.clone();
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => checker.check_title(&follow).await,
                    Err(e) => TitleOutcome::Error(format!("checker shut down: {e}")),
                };
                (follow, outcome)
            });
        }

        let mut summary = CheckSummary::default();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((follow, outcome)) => summary.add(&follow, outcome),
                Err(e) => {
                    tracing::error!("check task failed: {e}");
                    summary.errors.push(CheckError {
                        title: String::new(),
                        source_url: String::new(),
                        error: e.to_string(),
                    });
                }
            }
        }
        summary.errors.sort_by(|a, b| a.title.cmp(&b.title));
        summary.duration = started.elapsed();
        tracing::info!("{summary}");
        Ok(summary)
    }

    /// Checks one title. Errors are recorded on the follow and returned as an outcome.
    pub async fn check_title(&self, follow: &FollowEntry) -> TitleOutcome {
        match self.try_check_title(follow).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let msg = format!("{e:#}");
                tracing::warn!(title = %follow.title, url = %follow.source_url, "check failed: {msg}");
                if let Err(db_err) = self.db.record_follow_error(follow.id, &msg).await {
                    tracing::warn!(title = %follow.title, "recording check error: {db_err}");
                }
                TitleOutcome::Error(msg)
            }
        }
    }

    async fn try_check_title(&self, follow: &FollowEntry) -> Result<TitleOutcome> {
        let remote = self
            .remote
            .aggregate_count(&follow.source_url, &follow.language)
            .await?;
        let count_changed_at = self.db.record_follow_check(follow.id, remote).await?;

        let mut local = self
            .history
            .count_for_title(&follow.library, &follow.title, &follow.language)
            .await?;
        if local >= remote {
            tracing::debug!(title = %follow.title, local, remote, "up to date");
            return Ok(TitleOutcome::UpToDate);
        }

        // The index may lag the archives on disk (crash between writes, or
        // files from an older layout); repair before deciding.
        let dir = self.cfg.title_dir(&follow.library, &follow.title);
        self.history
            .reconcile_title(&follow.library, &follow.title, &follow.language, &dir)
            .await?;
        local = self
            .history
            .count_for_title(&follow.library, &follow.title, &follow.language)
            .await?;
        if local >= remote {
            tracing::debug!(title = %follow.title, local, remote, "up to date after repair");
            return Ok(TitleOutcome::UpToDate);
        }

        let job = NewJob {
            source_url: follow.source_url.clone(),
            title: follow.title.clone(),
            library: follow.library.clone(),
            language: follow.language.clone(),
            priority: FOLLOW_PRIORITY,
            max_retries: self.cfg.max_retries,
            origin: JobOrigin::Follow,
        };
        match self.db.insert_follow_job(&job, count_changed_at).await {
            Ok(job) => {
                tracing::info!(job_id = job.id, title = %follow.title, local, remote, "queued new chapters");
                Ok(TitleOutcome::Enqueued(job.id))
            }
            Err(QueueError::Duplicate { existing, status }) => {
                tracing::debug!(title = %follow.title, existing, %status, "already queued");
                Ok(TitleOutcome::AlreadyQueued(existing))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests;
