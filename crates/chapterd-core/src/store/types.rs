//! Types used by the state database.

use std::fmt;
use std::str::FromStr;

use crate::retry::FailureKind;

/// Job identifier.
pub type JobId = i64;

/// Lifecycle of a queue entry.
///
/// `PENDING → DOWNLOADING → {COMPLETED | FAILED}`, `FAILED → PENDING` (retry),
/// and any non-terminal status `→ CANCELLED`. COMPLETED and CANCELLED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Downloading,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Downloading => "downloading",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }

    /// Whether the state machine allows `self → next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Downloading) => true,
            (Downloading, Completed) | (Downloading, Failed) => true,
            (Failed, Pending) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown status string (e.g. from a CLI argument or a hand-edited database).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status {0:?} (expected pending, downloading, completed, failed or cancelled)")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Who asked for the job. Follow-driven enqueues use a stricter duplicate rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOrigin {
    Manual,
    Follow,
}

impl JobOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            JobOrigin::Manual => "manual",
            JobOrigin::Follow => "follow",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "follow" {
            JobOrigin::Follow
        } else {
            JobOrigin::Manual
        }
    }
}

/// Everything needed to insert a PENDING job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub source_url: String,
    pub title: String,
    pub library: String,
    pub language: String,
    pub priority: i64,
    pub max_retries: u32,
    pub origin: JobOrigin,
}

/// Full queue entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub source_url: String,
    pub title: String,
    pub library: String,
    pub language: String,
    pub origin: JobOrigin,
    pub status: JobStatus,
    /// Lower is sooner.
    pub priority: i64,
    pub progress_percent: f64,
    pub current_chapter: i64,
    pub total_chapters: i64,
    pub retry_count: u32,
    pub max_retries: u32,
    pub failure_kind: Option<FailureKind>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub updated_at: i64,
}

/// Filter for `list_jobs`; `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub library: Option<String>,
}

/// Progress counters persisted on every callback from the process runner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobProgress {
    pub percent: f64,
    pub current_chapter: i64,
    pub total_chapters: i64,
}
