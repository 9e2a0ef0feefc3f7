//! `chapterd list` – show jobs in queue order.

use anyhow::Result;
use chapterd_core::config::ChapterdConfig;
use chapterd_core::queue::DownloadQueue;
use chapterd_core::store::{JobFilter, JobStatus, StateDb};

pub async fn run_list(
    db: &StateDb,
    cfg: &ChapterdConfig,
    status: Option<JobStatus>,
    library: Option<String>,
) -> Result<()> {
    let queue = DownloadQueue::new(db.clone(), cfg);
    let jobs = queue.list(&JobFilter { status, library }).await?;
    if jobs.is_empty() {
        println!("No jobs in queue.");
        return Ok(());
    }
    println!(
        "{:<6} {:<12} {:<4} {:<16} {:<6} {}",
        "ID", "STATUS", "PRI", "PROGRESS", "RETRY", "TITLE"
    );
    for j in jobs {
        let progress = format!(
            "{:.0}% {}/{}",
            j.progress_percent, j.current_chapter, j.total_chapters
        );
        println!(
            "{:<6} {:<12} {:<4} {:<16} {:<6} {}",
            j.id,
            j.status.as_str(),
            j.priority,
            progress,
            format!("{}/{}", j.retry_count, j.max_retries),
            j.title
        );
        if let Some(err) = j.error_message.as_deref().filter(|_| j.status == JobStatus::Failed) {
            let kind = j.failure_kind.map(|k| k.as_str()).unwrap_or("unknown");
            println!("       {kind}: {err}");
        }
    }
    Ok(())
}
