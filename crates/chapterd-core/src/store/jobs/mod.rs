//! Download queue rows: reads, writes and row mapping.

mod read;
mod write;

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::types::{Job, JobOrigin, JobStatus};
use crate::retry::FailureKind;

pub(super) const JOB_COLUMNS: &str = r#"
    id, source_url, title, library, language, origin, status, priority,
    progress_percent, current_chapter, total_chapters, retry_count, max_retries,
    failure_kind, error_message, created_at, started_at, completed_at, updated_at
"#;

pub(super) fn job_from_row(row: &SqliteRow) -> Result<Job, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    let status = status_str
        .parse::<JobStatus>()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    let origin: String = row.try_get("origin")?;
    let failure_kind: Option<String> = row.try_get("failure_kind")?;
    let retry_count: i64 = row.try_get("retry_count")?;
    let max_retries: i64 = row.try_get("max_retries")?;

    Ok(Job {
        id: row.try_get("id")?,
        source_url: row.try_get("source_url")?,
        title: row.try_get("title")?,
        library: row.try_get("library")?,
        language: row.try_get("language")?,
        origin: JobOrigin::parse(&origin),
        status,
        priority: row.try_get("priority")?,
        progress_percent: row.try_get("progress_percent")?,
        current_chapter: row.try_get("current_chapter")?,
        total_chapters: row.try_get("total_chapters")?,
        retry_count: retry_count.max(0) as u32,
        max_retries: max_retries.max(0) as u32,
        failure_kind: failure_kind.as_deref().and_then(FailureKind::parse),
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
