//! `chapterd add <url>` – queue a title for download.

use anyhow::Result;
use chapterd_core::config::ChapterdConfig;
use chapterd_core::queue::{DownloadQueue, EnqueueRequest};
use chapterd_core::store::StateDb;

pub async fn run_add(db: &StateDb, cfg: &ChapterdConfig, req: &EnqueueRequest) -> Result<()> {
    let queue = DownloadQueue::new(db.clone(), cfg);
    let job = queue.enqueue(req).await?;
    println!(
        "Added job {} for {} ({}, priority {})",
        job.id, job.title, job.language, job.priority
    );
    Ok(())
}
