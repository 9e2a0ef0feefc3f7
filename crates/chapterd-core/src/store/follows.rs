//! Follow list: titles the chapter checker polls for new chapters.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::db::{unix_timestamp, StateDb};
use super::error::QueueError;

/// A followed title plus what the last check saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowEntry {
    pub id: i64,
    pub source_url: String,
    pub title: String,
    pub language: String,
    pub library: String,
    pub last_remote_count: Option<i64>,
    /// When `last_remote_count` last changed (or the follow was added).
    pub count_changed_at: i64,
    pub last_checked_at: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewFollow {
    pub source_url: String,
    pub title: String,
    pub language: String,
    pub library: String,
}

fn follow_from_row(row: &SqliteRow) -> Result<FollowEntry, sqlx::Error> {
    Ok(FollowEntry {
        id: row.try_get("id")?,
        source_url: row.try_get("source_url")?,
        title: row.try_get("title")?,
        language: row.try_get("language")?,
        library: row.try_get("library")?,
        last_remote_count: row.try_get("last_remote_count")?,
        count_changed_at: row.try_get("count_changed_at")?,
        last_checked_at: row.try_get("last_checked_at")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
    })
}

const FOLLOW_COLUMNS: &str = "id, source_url, title, language, library, last_remote_count, \
     count_changed_at, last_checked_at, last_error, created_at";

impl StateDb {
    /// Follow a title. Following an already-followed URL updates its title,
    /// language and library and keeps the check history.
    pub async fn add_follow(&self, follow: &NewFollow) -> Result<FollowEntry, QueueError> {
        url::Url::parse(&follow.source_url)
            .map_err(|e| QueueError::Invalid(format!("source URL {:?}: {e}", follow.source_url)))?;
        if follow.title.trim().is_empty() {
            return Err(QueueError::Invalid("title must not be empty".to_string()));
        }
        let now = unix_timestamp();
        sqlx::query(
            r#"
            INSERT INTO follows (source_url, title, language, library, count_changed_at, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT (source_url) DO UPDATE
            SET title = excluded.title,
                language = excluded.language,
                library = excluded.library
            "#,
        )
        .bind(&follow.source_url)
        .bind(follow.title.trim())
        .bind(&follow.language)
        .bind(&follow.library)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let sql = format!("SELECT {FOLLOW_COLUMNS} FROM follows WHERE source_url = ?1");
        let row = sqlx::query(&sql)
            .bind(&follow.source_url)
            .fetch_one(&self.pool)
            .await?;
        Ok(follow_from_row(&row)?)
    }

    /// Stop following a title. Returns false if it was not followed.
    pub async fn remove_follow(&self, source_url: &str) -> Result<bool, QueueError> {
        let r = sqlx::query("DELETE FROM follows WHERE source_url = ?1")
            .bind(source_url)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected() == 1)
    }

    pub async fn list_follows(&self) -> Result<Vec<FollowEntry>, QueueError> {
        let sql = format!("SELECT {FOLLOW_COLUMNS} FROM follows ORDER BY title ASC, id ASC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| follow_from_row(r).map_err(QueueError::from))
            .collect()
    }

    /// Record a successful check. `count_changed_at` moves only when the remote
    /// count differs from the previous one; the resulting value is returned.
    pub async fn record_follow_check(
        &self,
        id: i64,
        remote_count: i64,
    ) -> Result<i64, QueueError> {
        let now = unix_timestamp();
        let row = sqlx::query(
            r#"
            UPDATE follows
            SET count_changed_at = CASE
                    WHEN last_remote_count IS NULL OR last_remote_count != ?1 THEN ?2
                    ELSE count_changed_at
                END,
                last_remote_count = ?1,
                last_checked_at = ?2,
                last_error = NULL
            WHERE id = ?3
            RETURNING count_changed_at
            "#,
        )
        .bind(remote_count)
        .bind(now)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(row.try_get("count_changed_at")?),
            None => Err(QueueError::Invalid(format!("follow {id} not found"))),
        }
    }

    /// Record a failed check; the previous counts are kept.
    pub async fn record_follow_error(&self, id: i64, error: &str) -> Result<(), QueueError> {
        let now = unix_timestamp();
        sqlx::query("UPDATE follows SET last_checked_at = ?1, last_error = ?2 WHERE id = ?3")
            .bind(now)
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
