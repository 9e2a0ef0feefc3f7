//! Job write operations: enqueue, claim, status transitions, progress, removal.

use sqlx::Row;

use super::super::db::{unix_timestamp, StateDb};
use super::super::error::QueueError;
use super::super::types::{Job, JobId, JobProgress, JobStatus, NewJob};
use crate::retry::FailureKind;

fn validate_new_job(job: &NewJob) -> Result<(), QueueError> {
    let parsed = url::Url::parse(&job.source_url)
        .map_err(|e| QueueError::Invalid(format!("source URL {:?}: {e}", job.source_url)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(QueueError::Invalid(format!(
            "source URL must be http(s): {}",
            job.source_url
        )));
    }
    if job.title.trim().is_empty() {
        return Err(QueueError::Invalid("title must not be empty".to_string()));
    }
    if job.language.trim().is_empty() {
        return Err(QueueError::Invalid("language must not be empty".to_string()));
    }
    Ok(())
}

impl StateDb {
    /// Insert a new PENDING job unless an equivalent job (same source URL and
    /// language) is still live: PENDING, DOWNLOADING or FAILED. A FAILED job is
    /// brought back with a retry, not a second enqueue.
    pub async fn insert_job(&self, job: &NewJob) -> Result<Job, QueueError> {
        self.insert_unless_duplicate(job, None).await
    }

    /// Follow-driven variant: additionally rejects when an equivalent job
    /// COMPLETED at or after `count_changed_at`, i.e. nothing new appeared
    /// remotely since that job finished.
    pub async fn insert_follow_job(
        &self,
        job: &NewJob,
        count_changed_at: i64,
    ) -> Result<Job, QueueError> {
        self.insert_unless_duplicate(job, Some(count_changed_at)).await
    }

    async fn insert_unless_duplicate(
        &self,
        job: &NewJob,
        completed_since: Option<i64>,
    ) -> Result<Job, QueueError> {
        validate_new_job(job)?;
        let now = unix_timestamp();

        // Check and insert in one statement so concurrent enqueues cannot both pass.
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                source_url, title, library, language, origin, status,
                priority, max_retries, created_at, updated_at
            )
            SELECT ?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7, ?8, ?8
            WHERE NOT EXISTS (
                SELECT 1 FROM jobs
                WHERE source_url = ?1 AND language = ?4
                  AND (status IN ('pending', 'downloading', 'failed')
                       OR (?9 IS NOT NULL AND status = 'completed' AND completed_at >= ?9))
            )
            "#,
        )
        .bind(&job.source_url)
        .bind(job.title.trim())
        .bind(&job.library)
        .bind(&job.language)
        .bind(job.origin.as_str())
        .bind(job.priority)
        .bind(job.max_retries as i64)
        .bind(now)
        .bind(completed_since)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let row = sqlx::query(
                r#"
                SELECT id, status FROM jobs
                WHERE source_url = ?1 AND language = ?2
                  AND (status IN ('pending', 'downloading', 'failed')
                       OR (?3 IS NOT NULL AND status = 'completed' AND completed_at >= ?3))
                ORDER BY id DESC
                LIMIT 1
                "#,
            )
            .bind(&job.source_url)
            .bind(&job.language)
            .bind(completed_since)
            .fetch_one(&self.pool)
            .await?;
            let status: String = row.try_get("status")?;
            return Err(QueueError::Duplicate {
                existing: row.try_get("id")?,
                status: status.parse().unwrap_or(JobStatus::Pending),
            });
        }

        let id = result.last_insert_rowid();
        self.get_job(id).await?.ok_or(QueueError::NotFound(id))
    }

    /// Atomically move a PENDING job to DOWNLOADING. Returns false if it is no longer pending.
    pub async fn claim_pending(&self, id: JobId) -> Result<bool, QueueError> {
        let now = unix_timestamp();
        let r = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'downloading',
                started_at = ?1,
                error_message = NULL,
                failure_kind = NULL,
                updated_at = ?1
            WHERE id = ?2 AND status = 'pending'
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() == 1)
    }

    /// Validated status change (`markStatus`). Side effects per target:
    /// COMPLETED stamps `completed_at`, PENDING (manual retry from FAILED) resets
    /// the retry counter, DOWNLOADING stamps `started_at`.
    pub async fn set_status(&self, id: JobId, to: JobStatus) -> Result<Job, QueueError> {
        let current = self.get_job(id).await?.ok_or(QueueError::NotFound(id))?;
        let from = current.status;
        if !from.can_transition_to(to) {
            return Err(QueueError::IllegalTransition { id, from, to });
        }

        let now = unix_timestamp();
        let sql = match to {
            JobStatus::Downloading => {
                "UPDATE jobs SET status = ?1, started_at = ?2, error_message = NULL, \
                 failure_kind = NULL, updated_at = ?2 WHERE id = ?3 AND status = ?4"
            }
            JobStatus::Completed => {
                "UPDATE jobs SET status = ?1, completed_at = ?2, progress_percent = 100, \
                 error_message = NULL, failure_kind = NULL, updated_at = ?2 \
                 WHERE id = ?3 AND status = ?4"
            }
            JobStatus::Pending => {
                "UPDATE jobs SET status = ?1, retry_count = 0, error_message = NULL, \
                 failure_kind = NULL, updated_at = ?2 WHERE id = ?3 AND status = ?4"
            }
            JobStatus::Failed | JobStatus::Cancelled => {
                "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4"
            }
        };
        let r = sqlx::query(sql)
            .bind(to.as_str())
            .bind(now)
            .bind(id)
            .bind(from.as_str())
            .execute(&self.pool)
            .await?;

        if r.rows_affected() == 0 {
            // Lost a race with another writer; report what it changed to.
            let now_status = self
                .get_job(id)
                .await?
                .ok_or(QueueError::NotFound(id))?
                .status;
            return Err(QueueError::IllegalTransition {
                id,
                from: now_status,
                to,
            });
        }
        self.get_job(id).await?.ok_or(QueueError::NotFound(id))
    }

    /// DOWNLOADING → FAILED with the error text and its classification.
    /// Returns false if the job is no longer downloading (cancelled or deleted meanwhile).
    pub async fn mark_failed(
        &self,
        id: JobId,
        error: &str,
        kind: FailureKind,
    ) -> Result<bool, QueueError> {
        let now = unix_timestamp();
        let r = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed',
                error_message = ?1,
                failure_kind = ?2,
                updated_at = ?3
            WHERE id = ?4 AND status = 'downloading'
            "#,
        )
        .bind(error)
        .bind(kind.as_str())
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() == 1)
    }

    /// DOWNLOADING → COMPLETED. Returns false if the job is no longer downloading.
    pub async fn mark_completed(&self, id: JobId) -> Result<bool, QueueError> {
        let now = unix_timestamp();
        let r = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed',
                completed_at = ?1,
                progress_percent = 100,
                updated_at = ?1
            WHERE id = ?2 AND status = 'downloading'
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() == 1)
    }

    /// Automatic retry: FAILED → PENDING and `retry_count += 1`, only while
    /// `retry_count < max_retries`. Returns false when the ceiling is reached.
    pub async fn requeue_failed(&self, id: JobId) -> Result<bool, QueueError> {
        let now = unix_timestamp();
        let r = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                retry_count = retry_count + 1,
                updated_at = ?1
            WHERE id = ?2 AND status = 'failed' AND retry_count < max_retries
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() == 1)
    }

    /// Persist progress counters. Returns false if the job is no longer downloading.
    pub async fn update_progress(
        &self,
        id: JobId,
        progress: &JobProgress,
    ) -> Result<bool, QueueError> {
        let now = unix_timestamp();
        let r = sqlx::query(
            r#"
            UPDATE jobs
            SET progress_percent = ?1,
                current_chapter = ?2,
                total_chapters = ?3,
                updated_at = ?4
            WHERE id = ?5 AND status = 'downloading'
            "#,
        )
        .bind(progress.percent.clamp(0.0, 100.0))
        .bind(progress.current_chapter)
        .bind(progress.total_chapters)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() == 1)
    }

    /// Normalize any job left in DOWNLOADING to PENDING (a previous process died
    /// mid-job). Call before the first scheduler tick. Returns the number of jobs reset.
    pub async fn recover_interrupted_jobs(&self) -> Result<u64, QueueError> {
        let now = unix_timestamp();
        let r = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                updated_at = ?1
            WHERE status = 'downloading'
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }

    /// Delete every job with the given status. DOWNLOADING rows belong to the
    /// engine and cannot be cleared.
    pub async fn clear_by_status(&self, status: JobStatus) -> Result<u64, QueueError> {
        if status == JobStatus::Downloading {
            return Err(QueueError::Invalid(
                "active jobs cannot be cleared; cancel them first".to_string(),
            ));
        }
        let r = sqlx::query("DELETE FROM jobs WHERE status = ?1")
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }

    /// Permanently remove a job row. Returns false if it did not exist.
    pub async fn remove_job(&self, id: JobId) -> Result<bool, QueueError> {
        let r = sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected() == 1)
    }
}
