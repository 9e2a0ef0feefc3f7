//! Periodic trigger for the chapter checker.
//!
//! Runs one check immediately, then one every `check_interval`. A check that
//! is still running when the next one is due delays it rather than overlapping.
//! `trigger` requests an extra check right away (the `check` control command).

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::checker::{ChapterChecker, CheckSummary};

#[derive(Clone)]
pub struct FollowScheduler {
    checker: ChapterChecker,
    interval: Duration,
    wake: Arc<Notify>,
}

impl FollowScheduler {
    pub fn new(checker: ChapterChecker, interval: Duration) -> Self {
        Self {
            checker,
            interval,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Asks the running loop for an immediate check. Coalesces with a pending request.
    pub fn trigger(&self) {
        self.wake.notify_one();
    }

    /// Runs one check, logging instead of returning errors.
    pub async fn run_once(&self) -> Option<CheckSummary> {
        match self.checker.check_and_queue_new_chapters().await {
            Ok(summary) => {
                for err in &summary.errors {
                    tracing::warn!(title = %err.title, url = %err.source_url, "check error: {}", err.error);
                }
                Some(summary)
            }
            Err(e) => {
                tracing::error!("follow check failed: {e:#}");
                None
            }
        }
    }

    /// Loops until `stop` is cancelled. Returns the number of checks run.
    pub async fn run(&self, stop: CancellationToken) -> u64 {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = self.interval.as_secs(), "follow scheduler started");
        let mut runs = 0;
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = interval.tick() => {}
                _ = self.wake.notified() => tracing::info!("check requested"),
            }
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = self.run_once() => runs += 1,
            }
        }
        tracing::info!(runs, "follow scheduler stopped");
        runs
    }
}
