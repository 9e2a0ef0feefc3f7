//! Chapter history: which chapters of a title are already materialized.
//!
//! Archives on disk are authoritative; each carries its source URL in the
//! embedded `ComicInfo.xml`. The `chapters` table in the state database is an
//! index over them used for fast duplicate checks. The two are written in
//! order (tag, then index row) but not atomically, so [`ChapterHistory::reconcile_title`]
//! repairs any divergence the next time a title is touched.

pub mod archive;
mod key;
pub mod legacy;

pub use archive::ComicInfo;
pub use key::{canonical_number, ChapterKey, ChapterRecord};

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::sanitize::sanitize_component;
use crate::store::{unix_timestamp, ChapterRow, StateDb};

/// What a reconcile pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Tagged archives that were missing from the index.
    pub indexed: u32,
    /// Index rows whose archive no longer exists.
    pub dropped: u32,
    /// Untagged archives whose tag was rewritten from the index.
    pub backfilled: u32,
    pub legacy_imported: u32,
    /// Archives with neither a tag nor an index row.
    pub unidentified: u32,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        self.indexed + self.dropped + self.backfilled + self.legacy_imported > 0
    }
}

/// Metadata document written into a chapter's archive.
pub fn comic_info_for(record: &ChapterRecord) -> ComicInfo {
    ComicInfo {
        series: Some(record.key.title.clone()),
        title: None,
        number: Some(record.key.number.clone()),
        volume: record.volume.clone(),
        language: Some(record.key.language.clone()),
        translator: (!record.key.group.is_empty()).then(|| record.key.group.clone()),
        web: Some(record.chapter_url.clone()),
    }
}

fn record_from_row(row: &ChapterRow) -> ChapterRecord {
    ChapterRecord {
        key: ChapterKey {
            library: row.library.clone(),
            title: row.title.clone(),
            number: row.chapter_number.clone(),
            language: row.language.clone(),
            group: row.group_key.clone(),
        },
        job_id: row.job_id,
        chapter_url: row.chapter_url.clone(),
        volume: row.volume.clone(),
        filename: row.filename.clone(),
        completed_at: row.completed_at,
    }
}

/// True when the tag identifies a different chapter than `record`. Fields the
/// tag leaves out are not held against it.
fn tagged_as_other_chapter(info: &ComicInfo, record: &ChapterRecord) -> bool {
    match info.web.as_deref() {
        None => return false,
        Some(web) if web == record.chapter_url => return false,
        Some(_) => {}
    }
    let other_number = info
        .number
        .as_deref()
        .is_some_and(|n| canonical_number(n) != record.key.number);
    let other_group = info
        .translator
        .as_deref()
        .is_some_and(|g| g.trim() != record.key.group);
    other_number || other_group
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Archive found in a title directory and what its tag says.
struct Scanned {
    filename: String,
    info: Option<ComicInfo>,
}

fn scan_dir(dir: &Path) -> Result<Vec<Scanned>> {
    let mut out = Vec::new();
    for path in archive::list_archives(dir)? {
        let info = match archive::read_comic_info(&path) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(file = %path.display(), "unreadable archive: {e:#}");
                None
            }
        };
        out.push(Scanned {
            filename: file_name_of(&path),
            info,
        });
    }
    Ok(out)
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("history I/O task panicked")?
}

/// The chapter history store.
#[derive(Clone, Debug)]
pub struct ChapterHistory {
    db: StateDb,
}

impl ChapterHistory {
    pub fn new(db: StateDb) -> Self {
        Self { db }
    }

    pub async fn is_downloaded(&self, key: &ChapterKey) -> Result<bool> {
        Ok(self
            .db
            .chapter_exists(&key.library, &key.title, &key.number, &key.language, &key.group)
            .await?)
    }

    /// Index one chapter. Returns false if the key was already recorded.
    pub async fn record(&self, record: &ChapterRecord) -> Result<bool> {
        Ok(self.db.insert_chapter(&record.to_row()).await?)
    }

    /// Distinct chapter numbers recorded for `title` in `language`.
    pub async fn count_for_title(&self, library: &str, title: &str, language: &str) -> Result<i64> {
        Ok(self
            .db
            .count_distinct_chapters(library, title, &language.trim().to_ascii_lowercase())
            .await?)
    }

    pub async fn chapters(&self, library: &str, title: &str) -> Result<Vec<ChapterRecord>> {
        let rows = self.db.chapters_for_title(library, title).await?;
        Ok(rows.iter().map(record_from_row).collect())
    }

    /// A file name in `dir` for a new archive of `key`, starting from `preferred`.
    /// Names already on disk or indexed for another chapter are skipped: the
    /// group is appended first, then a counter.
    pub async fn free_archive_name(
        &self,
        dir: &Path,
        key: &ChapterKey,
        preferred: &str,
    ) -> Result<String> {
        let path = Path::new(preferred);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("Ch. {}", key.number));
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| archive::ARCHIVE_EXT.to_string());

        let group = sanitize_component(&key.group);
        let base = if group.is_empty() {
            stem
        } else {
            format!("{stem} [{group}]")
        };
        let mut candidates = vec![preferred.to_string(), format!("{base}.{ext}")];
        candidates.extend((2..).take(98).map(|n| format!("{base} ({n}).{ext}")));
        for name in candidates {
            let taken = tokio::fs::try_exists(dir.join(&name)).await.unwrap_or(true)
                || self
                    .db
                    .chapter_filename_in_use(&key.library, &key.title, &name)
                    .await?;
            if !taken {
                return Ok(name);
            }
        }
        anyhow::bail!("no free archive name for {preferred} in {}", dir.display())
    }

    /// Makes a freshly written archive durable proof of its chapter: writes the
    /// metadata tag into `dir/record.filename`, then indexes the record.
    /// Returns false if the key was already indexed. An archive already tagged
    /// as another chapter is left untouched and is an error.
    pub async fn commit_chapter(&self, dir: &Path, record: &ChapterRecord) -> Result<bool> {
        let path = dir.join(&record.filename);
        let info = comic_info_for(record);
        let record_for_check = record.clone();
        blocking(move || {
            if let Some(existing) = archive::read_comic_info(&path)? {
                if tagged_as_other_chapter(&existing, &record_for_check) {
                    anyhow::bail!(
                        "{} already holds chapter {} ({})",
                        path.display(),
                        existing.number.as_deref().unwrap_or("?"),
                        existing.translator.as_deref().unwrap_or("no group")
                    );
                }
            }
            archive::ensure_comic_info(&path, &info)
        })
        .await?;
        self.record(record).await
    }

    /// Brings the index for `title` back in line with the archives in `dir`.
    ///
    /// Imports a legacy tracking file once, drops rows whose archive is gone,
    /// indexes tagged archives that are missing from the index, and backfills
    /// the tag into untagged archives the index knows by file name.
    pub async fn reconcile_title(
        &self,
        library: &str,
        title: &str,
        default_language: &str,
        dir: &Path,
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
            return Ok(report);
        }

        report.legacy_imported = self
            .import_legacy(library, title, default_language, dir)
            .await?;

        for row in self.db.chapters_for_title(library, title).await? {
            if !dir.join(&row.filename).exists() {
                let n = self
                    .db
                    .delete_chapter_by_filename(library, title, &row.filename)
                    .await?;
                report.dropped += n as u32;
            }
        }

        let by_file: HashMap<String, ChapterRecord> = self
            .chapters(library, title)
            .await?
            .into_iter()
            .map(|r| (r.filename.clone(), r))
            .collect();

        let scan_dir_path = dir.to_path_buf();
        let scanned = blocking(move || scan_dir(&scan_dir_path)).await?;
        let now = unix_timestamp();

        for found in scanned {
            match found.info.as_ref().and_then(|i| i.web.clone()) {
                Some(web) => {
                    let info = found.info.unwrap_or_default();
                    let number = match (&info.number, by_file.get(&found.filename)) {
                        (Some(n), _) => n.clone(),
                        (None, Some(known)) => known.key.number.clone(),
                        (None, None) => {
                            report.unidentified += 1;
                            continue;
                        }
                    };
                    let language = info.language.as_deref().unwrap_or(default_language);
                    let record = ChapterRecord {
                        key: ChapterKey::new(
                            library,
                            title,
                            &number,
                            language,
                            info.translator.as_deref(),
                        ),
                        job_id: None,
                        chapter_url: web,
                        volume: info.volume.clone(),
                        filename: found.filename.clone(),
                        completed_at: now,
                    };
                    if self.record(&record).await? {
                        tracing::debug!(title, file = %found.filename, "indexed untracked archive");
                        report.indexed += 1;
                    }
                }
                None => match by_file.get(&found.filename) {
                    Some(known) => {
                        let path = dir.join(&found.filename);
                        let info = comic_info_for(known);
                        blocking(move || archive::write_comic_info(&path, &info)).await?;
                        tracing::debug!(title, file = %found.filename, "backfilled archive tag");
                        report.backfilled += 1;
                    }
                    None => {
                        tracing::warn!(title, file = %found.filename, "archive has no source tag");
                        report.unidentified += 1;
                    }
                },
            }
        }

        if report.changed() {
            tracing::info!(
                title,
                indexed = report.indexed,
                dropped = report.dropped,
                backfilled = report.backfilled,
                legacy = report.legacy_imported,
                "reconciled chapter history"
            );
        }
        Ok(report)
    }

    /// Imports `.chapters.json` entries whose archive still exists, tagging each
    /// archive on the way, then retires the file.
    async fn import_legacy(
        &self,
        library: &str,
        title: &str,
        default_language: &str,
        dir: &Path,
    ) -> Result<u32> {
        let legacy_dir = dir.to_path_buf();
        let Some(entries) = blocking(move || legacy::read_legacy(&legacy_dir)).await? else {
            return Ok(0);
        };
        let now = unix_timestamp();
        let mut imported = 0;
        for entry in entries {
            let path: PathBuf = dir.join(&entry.file);
            if !path.is_file() {
                continue;
            }
            let language = entry.language.as_deref().unwrap_or(default_language);
            let record = ChapterRecord {
                key: ChapterKey::new(
                    library,
                    title,
                    &entry.chapter,
                    language,
                    entry.group.as_deref(),
                ),
                job_id: None,
                chapter_url: entry.url.clone(),
                volume: entry.volume.clone(),
                filename: file_name_of(&path),
                completed_at: now,
            };
            let info = comic_info_for(&record);
            blocking(move || archive::ensure_comic_info(&path, &info)).await?;
            if self.record(&record).await? {
                imported += 1;
            }
        }
        let retire_dir = dir.to_path_buf();
        blocking(move || legacy::retire_legacy(&retire_dir)).await?;
        tracing::info!(title, imported, "imported legacy chapter tracking file");
        Ok(imported)
    }
}
