//! `chapterd check` – check followed titles now.
//!
//! With a daemon running, asks it to check (its scheduler owns the follow
//! loop); otherwise runs one check in-process and prints the summary.

use anyhow::Result;
use chapterd_core::checker::ChapterChecker;
use chapterd_core::config::ChapterdConfig;
use chapterd_core::control::{ControlCommand, ControlReply};
use chapterd_core::rate_limit::RateLimiter;
use chapterd_core::store::StateDb;
use std::sync::Arc;

use super::remote_client;
use crate::cli::control_socket;

pub async fn run_check(db: &StateDb, cfg: Arc<ChapterdConfig>) -> Result<()> {
    match control_socket::try_daemon(ControlCommand::Check).await {
        Some(ControlReply::Ok(msg)) => {
            println!("Daemon: {msg}");
            return Ok(());
        }
        Some(ControlReply::Err(msg)) => anyhow::bail!(msg),
        None => {}
    }

    let limiter = RateLimiter::from_config(&cfg.rate_limit);
    let checker = ChapterChecker::new(db.clone(), remote_client(&cfg, limiter), cfg);
    let summary = checker.check_and_queue_new_chapters().await?;
    println!("{summary}");
    for err in &summary.errors {
        println!("  {}: {}", err.title, err.error);
    }
    Ok(())
}
