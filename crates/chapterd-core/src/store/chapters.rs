//! Chapter history index rows. The archives on disk are authoritative; this
//! table is the fast-path duplicate check (see `crate::history`).

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::db::StateDb;
use super::error::QueueError;
use super::types::JobId;

/// One indexed chapter.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterRow {
    pub job_id: Option<JobId>,
    /// Library subdirectory; empty for the library root.
    pub library: String,
    pub title: String,
    /// Canonical number string ("12", "12.5").
    pub chapter_number: String,
    pub chapter_sort: f64,
    pub volume: Option<String>,
    pub language: String,
    /// Empty when the chapter has no scanlation group.
    pub group_key: String,
    pub chapter_url: String,
    /// File name relative to the title directory.
    pub filename: String,
    pub completed_at: i64,
}

fn chapter_from_row(row: &SqliteRow) -> Result<ChapterRow, sqlx::Error> {
    Ok(ChapterRow {
        job_id: row.try_get("job_id")?,
        library: row.try_get("library")?,
        title: row.try_get("title")?,
        chapter_number: row.try_get("chapter_number")?,
        chapter_sort: row.try_get("chapter_sort")?,
        volume: row.try_get("volume")?,
        language: row.try_get("language")?,
        group_key: row.try_get("group_key")?,
        chapter_url: row.try_get("chapter_url")?,
        filename: row.try_get("filename")?,
        completed_at: row.try_get("completed_at")?,
    })
}

impl StateDb {
    /// Insert a chapter row; a row with the same (library, title, number,
    /// language, group) wins and the insert is ignored. Returns true if this
    /// call inserted it.
    pub async fn insert_chapter(&self, c: &ChapterRow) -> Result<bool, QueueError> {
        let r = sqlx::query(
            r#"
            INSERT INTO chapters (
                job_id, library, title, chapter_number, chapter_sort, volume, language,
                group_key, chapter_url, filename, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT (library, title, chapter_number, language, group_key) DO NOTHING
            "#,
        )
        .bind(c.job_id)
        .bind(&c.library)
        .bind(&c.title)
        .bind(&c.chapter_number)
        .bind(c.chapter_sort)
        .bind(&c.volume)
        .bind(&c.language)
        .bind(&c.group_key)
        .bind(&c.chapter_url)
        .bind(&c.filename)
        .bind(c.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() == 1)
    }

    pub async fn chapter_exists(
        &self,
        library: &str,
        title: &str,
        chapter_number: &str,
        language: &str,
        group_key: &str,
    ) -> Result<bool, QueueError> {
        let row = sqlx::query(
            r#"
            SELECT 1 FROM chapters
            WHERE library = ?1 AND title = ?2 AND chapter_number = ?3
              AND language = ?4 AND group_key = ?5
            LIMIT 1
            "#,
        )
        .bind(library)
        .bind(title)
        .bind(chapter_number)
        .bind(language)
        .bind(group_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Distinct chapter numbers recorded for a title in one language.
    pub async fn count_distinct_chapters(
        &self,
        library: &str,
        title: &str,
        language: &str,
    ) -> Result<i64, QueueError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(DISTINCT chapter_number) AS n FROM chapters
            WHERE library = ?1 AND title = ?2 AND language = ?3
            "#,
        )
        .bind(library)
        .bind(title)
        .bind(language)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }

    /// All rows for a title in one library, in reading order.
    pub async fn chapters_for_title(
        &self,
        library: &str,
        title: &str,
    ) -> Result<Vec<ChapterRow>, QueueError> {
        let rows = sqlx::query(
            r#"
            SELECT job_id, library, title, chapter_number, chapter_sort, volume, language,
                   group_key, chapter_url, filename, completed_at
            FROM chapters
            WHERE library = ?1 AND title = ?2
            ORDER BY chapter_sort ASC, group_key ASC
            "#,
        )
        .bind(library)
        .bind(title)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| chapter_from_row(r).map_err(QueueError::from))
            .collect()
    }

    /// True if some row of the title already points at `filename`.
    pub async fn chapter_filename_in_use(
        &self,
        library: &str,
        title: &str,
        filename: &str,
    ) -> Result<bool, QueueError> {
        let row = sqlx::query(
            "SELECT 1 FROM chapters WHERE library = ?1 AND title = ?2 AND filename = ?3 LIMIT 1",
        )
        .bind(library)
        .bind(title)
        .bind(filename)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Drop the index row for an archive that no longer exists on disk.
    pub async fn delete_chapter_by_filename(
        &self,
        library: &str,
        title: &str,
        filename: &str,
    ) -> Result<u64, QueueError> {
        let r = sqlx::query(
            "DELETE FROM chapters WHERE library = ?1 AND title = ?2 AND filename = ?3",
        )
        .bind(library)
        .bind(title)
        .bind(filename)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }
}
