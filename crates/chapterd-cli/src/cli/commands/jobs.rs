//! `chapterd cancel|delete|retry|clear` – per-job administration.
//!
//! Cancel and delete go through a running daemon when there is one, so an
//! active job's download tool is killed; otherwise they are plain DB writes.

use anyhow::Result;
use chapterd_core::config::ChapterdConfig;
use chapterd_core::control::{ControlCommand, ControlReply};
use chapterd_core::queue::DownloadQueue;
use chapterd_core::store::{JobStatus, StateDb};

use crate::cli::control_socket;

fn reply_to_result(reply: ControlReply) -> Result<()> {
    match reply {
        ControlReply::Ok(msg) => {
            println!("{msg}");
            Ok(())
        }
        ControlReply::Err(msg) => Err(anyhow::anyhow!(msg)),
    }
}

pub async fn run_cancel(db: &StateDb, cfg: &ChapterdConfig, id: i64) -> Result<()> {
    if let Some(reply) = control_socket::try_daemon(ControlCommand::Cancel(id)).await {
        return reply_to_result(reply);
    }
    let queue = DownloadQueue::new(db.clone(), cfg);
    let job = queue.mark_status(id, JobStatus::Cancelled).await?;
    println!("Cancelled job {id} ({})", job.title);
    Ok(())
}

pub async fn run_delete(db: &StateDb, cfg: &ChapterdConfig, id: i64) -> Result<()> {
    if let Some(reply) = control_socket::try_daemon(ControlCommand::Delete(id)).await {
        return reply_to_result(reply);
    }
    let queue = DownloadQueue::new(db.clone(), cfg);
    if !queue.remove(id).await? {
        anyhow::bail!("job {id} not found");
    }
    println!("Deleted job {id}");
    Ok(())
}

pub async fn run_retry(db: &StateDb, cfg: &ChapterdConfig, id: i64) -> Result<()> {
    let queue = DownloadQueue::new(db.clone(), cfg);
    let job = queue.mark_status(id, JobStatus::Pending).await?;
    println!("Job {id} ({}) queued for retry", job.title);
    Ok(())
}

pub async fn run_clear(db: &StateDb, cfg: &ChapterdConfig, status: JobStatus) -> Result<()> {
    let queue = DownloadQueue::new(db.clone(), cfg);
    let n = queue.clear_by_status(status).await?;
    println!("Removed {n} {status} job(s)");
    Ok(())
}
