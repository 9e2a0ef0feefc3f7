//! Errors surfaced by queue operations.

use super::types::{JobId, JobStatus};

/// Failure of a queue operation. Input problems are reported before any write.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("job {existing} for this source is already {status}")]
    Duplicate { existing: JobId, status: JobStatus },

    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("job {id} cannot move from {from} to {to}")]
    IllegalTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}
