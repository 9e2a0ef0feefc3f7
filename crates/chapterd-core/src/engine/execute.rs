//! Worker that drives one claimed job to a final status.
//!
//! Chapters are processed in the order the remote lists them. Each chapter is
//! checked against the history store first, so a restarted job resumes after
//! the last recorded chapter. A chapter is recorded right after its archive is
//! written and tagged; a failure on chapter N leaves 1..N-1 recorded.
//!
//! The tool writes into a fresh staging directory inside the title directory.
//! The archive is then moved next to the others under a name no other chapter
//! holds, so two groups' releases of one chapter never overwrite each other.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::progress::{overall_percent, ProgressEvent};
use super::Shared;
use crate::history::{ChapterKey, ChapterRecord};
use crate::remote::RemoteChapter;
use crate::retry::FailureKind;
use crate::runner::{RunOutcome, ToolEvent, ToolInvocation};
use crate::store::{unix_timestamp, Job, JobId, JobProgress, JobStatus};

/// Why a job stopped before completing.
enum Stop {
    /// Cancelled, deleted or shut down; the status was written elsewhere.
    Cancelled,
    Failed { message: String, kind: FailureKind },
}

impl Stop {
    fn transient(message: impl Into<String>) -> Self {
        Stop::Failed {
            message: message.into(),
            kind: FailureKind::Transient,
        }
    }
}

pub(super) async fn execute_job(shared: Arc<Shared>, job: Job, cancel: Arc<AtomicBool>) {
    let job_id = job.id;
    tracing::info!(job_id, title = %job.title, url = %job.source_url, "job started");
    shared.publish_job(job_id).await;

    let result = run_chapters(&shared, &job, &cancel).await;
    match result {
        Ok(()) if !cancel.load(Ordering::SeqCst) => match shared.db.mark_completed(job_id).await {
            Ok(true) => tracing::info!(job_id, title = %job.title, "job completed"),
            Ok(false) => tracing::debug!(job_id, "job left downloading before completion"),
            Err(e) => tracing::error!(job_id, "mark completed: {e}"),
        },
        Ok(()) | Err(Stop::Cancelled) => {
            tracing::info!(job_id, title = %job.title, "job stopped");
        }
        Err(Stop::Failed { message, kind }) => {
            tracing::warn!(job_id, title = %job.title, kind = kind.as_str(), "job failed: {message}");
            if let Err(e) = shared.db.mark_failed(job_id, &message, kind).await {
                tracing::error!(job_id, "mark failed: {e}");
            }
        }
    }
    shared.publish_job(job_id).await;
    shared.active.unregister(job_id);
}

async fn run_chapters(shared: &Shared, job: &Job, cancel: &AtomicBool) -> Result<(), Stop> {
    let dir = shared.cfg.title_dir(&job.library, &job.title);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| Stop::transient(format!("create {}: {e}", dir.display())))?;

    match shared
        .history
        .reconcile_title(&job.library, &job.title, &job.language, &dir)
        .await
    {
        Ok(report) if report.changed() => {
            tracing::debug!(job_id = job.id, ?report, "history repaired before start")
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(job_id = job.id, "history repair failed: {e:#}"),
    }

    let chapters = shared
        .remote
        .list_chapters(&job.source_url, &job.language)
        .await
        .map_err(|e| Stop::Failed {
            message: e.to_string(),
            kind: e.failure_kind(),
        })?;
    let total = chapters.len();
    tracing::debug!(job_id = job.id, total, "chapter list fetched");

    let mut done = 0usize;
    persist(shared, job, done, 0.0, 0, total).await?;

    for (index, chapter) in chapters.iter().enumerate() {
        if cancel.load(Ordering::SeqCst) {
            return Err(Stop::Cancelled);
        }
        let key = chapter_key(job, chapter);
        let already = shared
            .history
            .is_downloaded(&key)
            .await
            .map_err(|e| Stop::transient(format!("history lookup: {e:#}")))?;
        if !already {
            shared.limiter.acquire().await;
            if cancel.load(Ordering::SeqCst) {
                return Err(Stop::Cancelled);
            }
            download_chapter(shared, job, &dir, chapter, key, cancel, index, done, total).await?;
        } else {
            tracing::debug!(job_id = job.id, chapter = %key.number, group = %key.group, "already downloaded");
        }
        done += 1;
        persist(shared, job, done, 0.0, index as i64 + 1, total).await?;
    }
    Ok(())
}

fn chapter_key(job: &Job, chapter: &RemoteChapter) -> ChapterKey {
    ChapterKey::new(
        &job.library,
        &job.title,
        chapter.number.as_deref().unwrap_or_default(),
        &chapter.language,
        chapter.group.as_deref(),
    )
}

#[allow(clippy::too_many_arguments)]
async fn download_chapter(
    shared: &Shared,
    job: &Job,
    dir: &Path,
    chapter: &RemoteChapter,
    key: ChapterKey,
    cancel: &AtomicBool,
    index: usize,
    done: usize,
    total: usize,
) -> Result<(), Stop> {
    let staging = staging_dir(dir, job.id, index);
    let result = download_staged(
        shared, job, dir, &staging, chapter, key, cancel, index, done, total,
    )
    .await;
    if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(job_id = job.id, dir = %staging.display(), "remove staging dir: {e}");
        }
    }
    result
}

/// Hidden per-chapter directory the tool writes into. Archive scans only look
/// at files directly inside the title directory, so it is never indexed.
fn staging_dir(dir: &Path, job_id: JobId, index: usize) -> PathBuf {
    dir.join(format!(".staging-{job_id}-{index}"))
}

#[allow(clippy::too_many_arguments)]
async fn download_staged(
    shared: &Shared,
    job: &Job,
    dir: &Path,
    staging: &Path,
    chapter: &RemoteChapter,
    key: ChapterKey,
    cancel: &AtomicBool,
    index: usize,
    done: usize,
    total: usize,
) -> Result<(), Stop> {
    // Leftovers from a run that died mid-chapter.
    let _ = tokio::fs::remove_dir_all(staging).await;
    tokio::fs::create_dir_all(staging)
        .await
        .map_err(|e| Stop::transient(format!("create {}: {e}", staging.display())))?;

    let (tx, rx) = mpsc::unbounded_channel();
    let progress = tokio::spawn(run_progress_loop(
        rx,
        ProgressCtx {
            db: shared.db.clone(),
            hub: shared.progress.clone(),
            job_id: job.id,
            title: job.title.clone(),
            done,
            current: index as i64 + 1,
            total,
        },
    ));

    let inv = ToolInvocation {
        job_id: job.id,
        url: chapter.url.clone(),
        dest: staging.to_path_buf(),
        language: job.language.clone(),
    };
    tracing::debug!(job_id = job.id, chapter = %key.number, group = %key.group, url = %chapter.url, "downloading chapter");
    let outcome = shared.runner.start_with_cancel(&inv, tx, cancel).await;
    let _ = progress.await;

    let archive = match outcome {
        Ok(RunOutcome::Success {
            archive: Some(archive),
        }) => archive,
        Ok(RunOutcome::Success { archive: None }) => {
            return Err(Stop::transient(format!(
                "chapter {}: tool exited successfully but wrote no archive",
                key.number
            )))
        }
        Ok(RunOutcome::Failed { code, stderr }) => {
            let message = if stderr.is_empty() {
                format!("chapter {}: tool exited with {code:?}", key.number)
            } else {
                stderr
            };
            return Err(Stop::transient(message));
        }
        Ok(RunOutcome::Killed) => return Err(Stop::Cancelled),
        Err(e) => return Err(Stop::transient(e.to_string())),
    };

    let archive = place_archive(shared, dir, &key, archive).await?;
    let record = ChapterRecord {
        key,
        job_id: Some(job.id),
        chapter_url: chapter.url.clone(),
        volume: chapter.volume.clone(),
        filename: archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        completed_at: unix_timestamp(),
    };
    shared
        .history
        .commit_chapter(dir, &record)
        .await
        .map_err(|e| Stop::transient(format!("record chapter {}: {e:#}", record.key.number)))?;
    Ok(())
}

/// Moves the tool's archive into the title directory under a name no other
/// chapter holds. Existing archives are never overwritten.
async fn place_archive(
    shared: &Shared,
    dir: &Path,
    key: &ChapterKey,
    archive: PathBuf,
) -> Result<PathBuf, Stop> {
    let Some(reported) = archive.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Err(Stop::transient(format!(
            "tool reported an invalid archive path {}",
            archive.display()
        )));
    };
    let name = shared
        .history
        .free_archive_name(dir, key, &reported)
        .await
        .map_err(|e| Stop::transient(format!("{e:#}")))?;
    if name != reported {
        tracing::debug!(chapter = %key.number, group = %key.group, %reported, file = %name, "archive name already taken");
    }
    let target = dir.join(&name);
    tokio::fs::rename(&archive, &target).await.map_err(|e| {
        Stop::transient(format!(
            "move {} into {}: {e}",
            archive.display(),
            dir.display()
        ))
    })?;
    Ok(target)
}

async fn persist(
    shared: &Shared,
    job: &Job,
    done: usize,
    chapter_percent: f64,
    current: i64,
    total: usize,
) -> Result<(), Stop> {
    let progress = JobProgress {
        percent: overall_percent(done, chapter_percent, total),
        current_chapter: current,
        total_chapters: total as i64,
    };
    match shared.db.update_progress(job.id, &progress).await {
        Ok(true) => {
            shared.progress.publish(event(job.id, &job.title, &progress));
            Ok(())
        }
        // Cancelled or deleted meanwhile.
        Ok(false) => Err(Stop::Cancelled),
        Err(e) => Err(Stop::transient(format!("persist progress: {e}"))),
    }
}

fn event(job_id: JobId, title: &str, p: &JobProgress) -> ProgressEvent {
    ProgressEvent {
        job_id,
        title: title.to_string(),
        status: JobStatus::Downloading,
        percent: p.percent,
        current_chapter: p.current_chapter,
        total_chapters: p.total_chapters,
        error: None,
        removed: false,
    }
}

struct ProgressCtx {
    db: crate::store::StateDb,
    hub: super::progress::ProgressHub,
    job_id: JobId,
    title: String,
    done: usize,
    current: i64,
    total: usize,
}

/// Persists and publishes every progress event the tool prints for one chapter.
async fn run_progress_loop(mut rx: mpsc::UnboundedReceiver<ToolEvent>, ctx: ProgressCtx) {
    while let Some(ev) = rx.recv().await {
        let ToolEvent::Progress { percent } = ev else {
            continue;
        };
        let progress = JobProgress {
            percent: overall_percent(ctx.done, percent, ctx.total),
            current_chapter: ctx.current,
            total_chapters: ctx.total as i64,
        };
        match ctx.db.update_progress(ctx.job_id, &progress).await {
            Ok(true) => ctx.hub.publish(event(ctx.job_id, &ctx.title, &progress)),
            Ok(false) => {}
            Err(e) => tracing::warn!(job_id = ctx.job_id, "durable progress update failed: {e}"),
        }
    }
}
