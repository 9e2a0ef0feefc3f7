//! SQLite-backed state database implementation.
//!
//! Handles connection, migrations, and timestamp helpers. Job CRUD lives in `jobs`,
//! the history index in `chapters`, the follow list in `follows`.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Handle to the SQLite-backed state database.
///
/// The database file is stored under the XDG state directory:
/// `~/.local/state/chapterd/state.db` on Debian.
#[derive(Clone, Debug)]
pub struct StateDb {
    pub(crate) pool: Pool<Sqlite>,
}

impl StateDb {
    /// Open (or create) the default state database and run migrations.
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("chapterd")?;
        let db_path = xdg_dirs.get_state_home().join("state.db");
        Self::open_at(db_path).await
    }

    /// Open (or create) the database at a specific path. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(std::time::Duration::from_secs(10));
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        let db = StateDb { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        // - `failure_kind` decides whether a FAILED job is auto-retried.
        // - `origin` is "manual" or "follow".
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_url TEXT NOT NULL,
                title TEXT NOT NULL,
                library TEXT NOT NULL DEFAULT '',
                language TEXT NOT NULL,
                origin TEXT NOT NULL DEFAULT 'manual',
                status TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 5,
                progress_percent REAL NOT NULL DEFAULT 0,
                current_chapter INTEGER NOT NULL DEFAULT 0,
                total_chapters INTEGER NOT NULL DEFAULT 0,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                failure_kind TEXT,
                error_message TEXT,
                created_at INTEGER NOT NULL,
                started_at INTEGER,
                completed_at INTEGER,
                updated_at INTEGER NOT NULL,
                CHECK (retry_count <= max_retries)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS jobs_pending ON jobs (status, priority, created_at, id);",
        )
        .execute(&self.pool)
        .await?;

        // Uniqueness is on the logical chapter, not its URL: the same chapter
        // can come back under another URL after a re-scrape. The same title in
        // two libraries lives in two directories and is tracked separately.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chapters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER,
                library TEXT NOT NULL DEFAULT '',
                title TEXT NOT NULL,
                chapter_number TEXT NOT NULL,
                chapter_sort REAL NOT NULL DEFAULT 0,
                volume TEXT,
                language TEXT NOT NULL,
                group_key TEXT NOT NULL DEFAULT '',
                chapter_url TEXT NOT NULL,
                filename TEXT NOT NULL,
                completed_at INTEGER NOT NULL,
                UNIQUE (library, title, chapter_number, language, group_key)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS follows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_url TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                language TEXT NOT NULL,
                library TEXT NOT NULL DEFAULT '',
                last_remote_count INTEGER,
                count_changed_at INTEGER NOT NULL,
                last_checked_at INTEGER,
                last_error TEXT,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Current time as Unix seconds (for DB timestamps).
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
/// Open an in-memory database for tests (no disk I/O).
pub(crate) async fn open_memory() -> Result<StateDb> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    let db = StateDb { pool };
    db.migrate().await?;
    Ok(db)
}
