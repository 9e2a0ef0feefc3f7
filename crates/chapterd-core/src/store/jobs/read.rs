//! Job read operations: get, list, next pending, retry candidates.

use super::super::db::StateDb;
use super::super::error::QueueError;
use super::super::types::{Job, JobFilter, JobId, JobStatus};
use super::{job_from_row, JOB_COLUMNS};

impl StateDb {
    /// Fetch a single job row.
    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(job_from_row).transpose()?)
    }

    /// List jobs in queue order (priority, then creation time), optionally filtered
    /// by status and library.
    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, QueueError> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE (?1 IS NULL OR status = ?1)
              AND (?2 IS NULL OR library = ?2)
            ORDER BY priority ASC, created_at ASC, id ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(filter.status.map(JobStatus::as_str))
            .bind(filter.library.as_deref())
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| job_from_row(r).map_err(QueueError::from))
            .collect()
    }

    /// The PENDING job that should run next: lowest priority number, then oldest.
    /// Does not claim it; see `claim_pending`.
    pub async fn dequeue_next_pending(&self) -> Result<Option<Job>, QueueError> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE status = 'pending'
            ORDER BY priority ASC, created_at ASC, id ASC
            LIMIT 1
            "#
        );
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(job_from_row).transpose()?)
    }

    /// FAILED jobs with a transient failure and retries left. The caller applies the cooldown.
    pub async fn retry_candidates(&self) -> Result<Vec<Job>, QueueError> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE status = 'failed'
              AND failure_kind = 'transient'
              AND retry_count < max_retries
            ORDER BY updated_at ASC, id ASC
            "#
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| job_from_row(r).map_err(QueueError::from))
            .collect()
    }
}
