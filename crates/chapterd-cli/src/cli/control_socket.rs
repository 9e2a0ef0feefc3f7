//! Control socket: server (during `chapterd run`) and client (for cancel/delete/check).
//! Protocol: one command line in, one reply line out (see `chapterd_core::control`).

use anyhow::Result;
use chapterd_core::control::{ControlCommand, ControlReply};
use chapterd_core::engine::Engine;
use chapterd_core::follow_scheduler::FollowScheduler;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Binds `path` and serves control commands until the task is aborted.
/// A stale socket file from a previous run is replaced.
pub fn spawn_control_listener(
    engine: Engine,
    follows: FollowScheduler,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)?;
    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let engine = engine.clone();
                    let follows = follows.clone();
                    tokio::spawn(serve_connection(stream, engine, follows));
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

async fn serve_connection(stream: UnixStream, engine: Engine, follows: FollowScheduler) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let reply = match line.parse::<ControlCommand>() {
            Ok(cmd) => {
                tracing::info!(command = %cmd, "control command");
                cmd.apply(&engine, &follows).await
            }
            Err(e) => ControlReply::Err(e.to_string()),
        };
        let mut out = reply.to_line();
        out.push('\n');
        if write.write_all(out.as_bytes()).await.is_err() {
            break;
        }
    }
}

/// Sends one command to a running daemon. `Ok(None)` when no daemon is listening.
pub async fn send_command(socket_path: &Path, cmd: ControlCommand) -> Result<Option<ControlReply>> {
    if !socket_path.exists() {
        return Ok(None);
    }
    let stream = match UnixStream::connect(socket_path).await {
        Ok(s) => s,
        // Stale socket left by a daemon that did not shut down cleanly.
        Err(e) => {
            tracing::debug!(path = %socket_path.display(), "control socket connect: {}", e);
            return Ok(None);
        }
    };
    let (read, mut write) = stream.into_split();
    write.write_all(format!("{cmd}\n").as_bytes()).await?;
    let mut lines = BufReader::new(read).lines();
    let line = lines
        .next_line()
        .await?
        .ok_or_else(|| anyhow::anyhow!("daemon closed the control connection"))?;
    ControlReply::parse_line(&line)
        .map(Some)
        .ok_or_else(|| anyhow::anyhow!("unexpected control reply {line:?}"))
}

/// Socket path, if the XDG state dir resolves.
pub fn socket_path() -> Option<PathBuf> {
    chapterd_core::control::default_control_socket_path().ok()
}

/// Sends `cmd` to the daemon if one is running. Falls back to `None` on any error.
pub async fn try_daemon(cmd: ControlCommand) -> Option<ControlReply> {
    let path = socket_path()?;
    match send_command(&path, cmd).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!("control socket: {e:#}");
            None
        }
    }
}
