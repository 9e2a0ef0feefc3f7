//! Live progress events for subscribers (CLI, UI layers).
//!
//! Delivery is best effort: slow subscribers lag and skip events. Every event
//! is also reflected in the persisted job row.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::store::{Job, JobId, JobStatus};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub title: String,
    #[serde(serialize_with = "status_str")]
    pub status: JobStatus,
    pub percent: f64,
    pub current_chapter: i64,
    pub total_chapters: i64,
    pub error: Option<String>,
    /// The job row was deleted; no further events follow for this id.
    pub removed: bool,
}

fn status_str<S: serde::Serializer>(s: &JobStatus, ser: S) -> Result<S::Ok, S::Error> {
    ser.serialize_str(s.as_str())
}

impl ProgressEvent {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            title: job.title.clone(),
            status: job.status,
            percent: job.progress_percent,
            current_chapter: job.current_chapter,
            total_chapters: job.total_chapters,
            error: job.error_message.clone(),
            removed: false,
        }
    }

    /// Final event for a deleted job, built from its last persisted state.
    pub fn removed(job: &Job) -> Self {
        Self {
            removed: true,
            ..Self::from_job(job)
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressHub {
    tx: broadcast::Sender<ProgressEvent>,
}

impl Default for ProgressHub {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }
}

impl ProgressHub {
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Publishes to current subscribers; no subscribers is not an error.
    pub fn publish(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

/// Overall job percent from whole chapters done plus progress in the current one.
pub fn overall_percent(done: usize, chapter_percent: f64, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    let done = done as f64 + (chapter_percent.clamp(0.0, 100.0) / 100.0);
    (done / total as f64 * 100.0).clamp(0.0, 100.0)
}
