//! Control socket round trip against an engine on a temporary database.

use crate::cli::control_socket::{send_command, spawn_control_listener};
use chapterd_core::checker::ChapterChecker;
use chapterd_core::config::ChapterdConfig;
use chapterd_core::control::{ControlCommand, ControlReply};
use chapterd_core::engine::Engine;
use chapterd_core::follow_scheduler::FollowScheduler;
use chapterd_core::queue::{DownloadQueue, EnqueueRequest};
use chapterd_core::rate_limit::RateLimiter;
use chapterd_core::remote::{MangaDexClient, RemoteApi};
use chapterd_core::retry::RetryPolicy;
use chapterd_core::store::{JobStatus, StateDb};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn cancel_over_the_socket() {
    let dir = tempfile::tempdir().unwrap();
    let db = StateDb::open_at(dir.path().join("state.db")).await.unwrap();
    let cfg = Arc::new(ChapterdConfig {
        library_dir: dir.path().join("lib"),
        ..ChapterdConfig::default()
    });
    let limiter = RateLimiter::from_config(&cfg.rate_limit);
    let remote: Arc<dyn RemoteApi> = Arc::new(MangaDexClient::new(
        &cfg.remote,
        RetryPolicy::default(),
        limiter.clone(),
    ));
    let engine = Engine::new(db.clone(), Arc::clone(&remote), limiter, Arc::clone(&cfg));
    let follows = FollowScheduler::new(
        ChapterChecker::new(db.clone(), remote, Arc::clone(&cfg)),
        Duration::from_secs(3600),
    );

    let socket = dir.path().join("control.sock");
    let listener = spawn_control_listener(engine, follows, &socket).unwrap();

    let queue = DownloadQueue::new(db.clone(), &cfg);
    let job = queue
        .enqueue(&EnqueueRequest {
            source_url: "https://mangadex.org/title/abc/foo".to_string(),
            ..EnqueueRequest::default()
        })
        .await
        .unwrap();

    let reply = send_command(&socket, ControlCommand::Cancel(job.id))
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(reply, ControlReply::Ok(_)), "{reply:?}");
    assert_eq!(queue.get(job.id).await.unwrap().status, JobStatus::Cancelled);

    let reply = send_command(&socket, ControlCommand::Delete(9999))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, ControlReply::Err("job 9999 not found".to_string()));

    listener.abort();
}

#[tokio::test]
async fn missing_socket_means_no_daemon() {
    let dir = tempfile::tempdir().unwrap();
    let reply = send_command(&dir.path().join("absent.sock"), ControlCommand::Check)
        .await
        .unwrap();
    assert!(reply.is_none());
}
