//! `chapterd run` – the daemon: execution engine, follow scheduler, control socket.

use anyhow::{Context, Result};
use chapterd_core::checker::ChapterChecker;
use chapterd_core::config::ChapterdConfig;
use chapterd_core::engine::{Engine, ProgressEvent};
use chapterd_core::follow_scheduler::FollowScheduler;
use chapterd_core::rate_limit::RateLimiter;
use chapterd_core::store::{JobStatus, StateDb};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::remote_client;
use crate::cli::control_socket;

pub async fn run_daemon(db: &StateDb, cfg: Arc<ChapterdConfig>) -> Result<()> {
    // One budget for checker requests and chapter downloads.
    let limiter = RateLimiter::from_config(&cfg.rate_limit);
    let remote = remote_client(&cfg, limiter.clone());
    let engine = Engine::new(db.clone(), Arc::clone(&remote), limiter, Arc::clone(&cfg));
    let follows = FollowScheduler::new(
        ChapterChecker::new(db.clone(), remote, Arc::clone(&cfg)),
        cfg.check_interval(),
    );

    let socket_path = control_socket::socket_path();
    let listener = socket_path.as_ref().and_then(|path| {
        match control_socket::spawn_control_listener(engine.clone(), follows.clone(), path) {
            Ok(handle) => {
                tracing::debug!(path = %path.display(), "control socket listening");
                Some(handle)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "control socket unavailable: {e:#}");
                None
            }
        }
    });

    let printer = tokio::spawn(print_progress(engine.subscribe()));
    let stop = CancellationToken::new();
    let engine_task = tokio::spawn({
        let engine = engine.clone();
        let stop = stop.clone();
        async move { engine.run(stop).await }
    });
    let follow_task = tokio::spawn({
        let follows = follows.clone();
        let stop = stop.clone();
        async move { follows.run(stop).await }
    });

    println!(
        "chapterd running (library {}); Ctrl-C to stop",
        cfg.library_dir.display()
    );
    wait_for_shutdown().await?;
    println!("Shutting down...");
    stop.cancel();

    let engine_result = engine_task.await.context("engine task")?;
    let checks = follow_task.await.context("follow scheduler task")?;
    if let Some(listener) = listener {
        listener.abort();
    }
    if let Some(path) = socket_path {
        let _ = std::fs::remove_file(path);
    }
    printer.abort();
    tracing::info!(checks, "daemon stopped");
    engine_result
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r.context("wait for Ctrl-C")?,
            _ = term.recv() => {}
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("wait for Ctrl-C")
    }
}

async fn print_progress(mut events: broadcast::Receiver<ProgressEvent>) {
    loop {
        match events.recv().await {
            Ok(ev) => println!("{}", format_event(&ev)),
            // Missed events are superseded by the next one.
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn format_event(ev: &ProgressEvent) -> String {
    if ev.removed {
        return format!("[job {}] {}: deleted", ev.job_id, ev.title);
    }
    match (ev.status, ev.error.as_deref()) {
        (JobStatus::Failed, Some(err)) => {
            format!("[job {}] {}: failed: {}", ev.job_id, ev.title, err)
        }
        (JobStatus::Downloading, _) => format!(
            "[job {}] {}: {:.1}% (chapter {}/{})",
            ev.job_id, ev.title, ev.percent, ev.current_chapter, ev.total_chapters
        ),
        (status, _) => format!("[job {}] {}: {}", ev.job_id, ev.title, status),
    }
}
