//! Control channel between the CLI and a running daemon.
//!
//! One request line per command (`cancel <id>`, `delete <id>`, `check`), one
//! reply line per request (`ok <message>` or `err <message>`). Cancel and delete
//! go through the engine so an active job's subprocess is killed right away.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::engine::Engine;
use crate::follow_scheduler::FollowScheduler;
use crate::store::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Cancel(JobId),
    Delete(JobId),
    Check,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed control command {0:?}")]
pub struct BadCommand(pub String);

impl FromStr for ControlCommand {
    type Err = BadCommand;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let bad = || BadCommand(line.to_string());
        let mut parts = line.split_whitespace();
        let verb = parts.next().ok_or_else(bad)?;
        let arg = parts.next();
        if parts.next().is_some() {
            return Err(bad());
        }
        let id = || arg.and_then(|a| a.parse::<JobId>().ok()).ok_or_else(bad);
        match verb {
            "cancel" => Ok(ControlCommand::Cancel(id()?)),
            "delete" => Ok(ControlCommand::Delete(id()?)),
            "check" if arg.is_none() => Ok(ControlCommand::Check),
            _ => Err(bad()),
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::Cancel(id) => write!(f, "cancel {id}"),
            ControlCommand::Delete(id) => write!(f, "delete {id}"),
            ControlCommand::Check => f.write_str("check"),
        }
    }
}

/// Reply to one control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    Ok(String),
    Err(String),
}

impl ControlReply {
    /// Single-line wire form; embedded newlines are flattened.
    pub fn to_line(&self) -> String {
        let (tag, msg) = match self {
            ControlReply::Ok(m) => ("ok", m),
            ControlReply::Err(m) => ("err", m),
        };
        format!("{tag} {}", msg.replace(['\r', '\n'], " "))
    }

    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim_end();
        let (tag, msg) = line.split_once(' ').unwrap_or((line, ""));
        match tag {
            "ok" => Some(ControlReply::Ok(msg.to_string())),
            "err" => Some(ControlReply::Err(msg.to_string())),
            _ => None,
        }
    }
}

impl ControlCommand {
    /// Executes the command against the daemon's engine and follow scheduler.
    pub async fn apply(self, engine: &Engine, follows: &FollowScheduler) -> ControlReply {
        match self {
            ControlCommand::Cancel(id) => match engine.cancel(id).await {
                Ok(job) => ControlReply::Ok(format!("job {id} ({}) cancelled", job.title)),
                Err(e) => ControlReply::Err(e.to_string()),
            },
            ControlCommand::Delete(id) => match engine.delete(id).await {
                Ok(true) => ControlReply::Ok(format!("job {id} deleted")),
                Ok(false) => ControlReply::Err(format!("job {id} not found")),
                Err(e) => ControlReply::Err(e.to_string()),
            },
            ControlCommand::Check => {
                follows.trigger();
                ControlReply::Ok("check requested".to_string())
            }
        }
    }
}

/// Default path for the control socket (same XDG state dir as the DB).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("chapterd")?.get_state_home();
    Ok(dir.join("control.sock"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!("cancel 7".parse::<ControlCommand>(), Ok(ControlCommand::Cancel(7)));
        assert_eq!("  delete 12 ".parse::<ControlCommand>(), Ok(ControlCommand::Delete(12)));
        assert_eq!("check".parse::<ControlCommand>(), Ok(ControlCommand::Check));
        for bad in ["", "cancel", "cancel x", "delete 1 2", "check now", "pause 1"] {
            assert!(bad.parse::<ControlCommand>().is_err(), "{bad:?}");
        }
    }

    #[test]
    fn command_display_parses_back() {
        for cmd in [ControlCommand::Cancel(3), ControlCommand::Delete(4), ControlCommand::Check] {
            assert_eq!(cmd.to_string().parse::<ControlCommand>(), Ok(cmd));
        }
    }

    #[test]
    fn replies_are_single_lines() {
        let reply = ControlReply::Err("job 3 cannot move\nfrom completed".to_string());
        let line = reply.to_line();
        assert_eq!(line, "err job 3 cannot move from completed");
        assert_eq!(
            ControlReply::parse_line(&format!("{line}\n")),
            Some(ControlReply::Err("job 3 cannot move from completed".to_string()))
        );
        assert_eq!(ControlReply::parse_line("ok"), Some(ControlReply::Ok(String::new())));
        assert_eq!(ControlReply::parse_line("maybe"), None);
    }

    mod apply {
        use super::*;
        use async_trait::async_trait;
        use std::sync::Arc;
        use std::time::Duration;

        use crate::checker::ChapterChecker;
        use crate::config::ChapterdConfig;
        use crate::rate_limit::RateLimiter;
        use crate::remote::{RemoteApi, RemoteChapter, RemoteError};
        use crate::store::{open_memory, JobOrigin, JobStatus, NewJob};

        struct NoRemote;

        #[async_trait]
        impl RemoteApi for NoRemote {
            async fn aggregate_count(&self, url: &str, _lang: &str) -> Result<i64, RemoteError> {
                Err(RemoteError::UnsupportedUrl(url.to_string()))
            }

            async fn list_chapters(&self, url: &str, _lang: &str) -> Result<Vec<RemoteChapter>, RemoteError> {
                Err(RemoteError::UnsupportedUrl(url.to_string()))
            }
        }

        #[tokio::test]
        async fn cancel_and_delete_go_through_the_engine() {
            let db = open_memory().await.unwrap();
            let cfg = Arc::new(ChapterdConfig::default());
            let remote: Arc<dyn RemoteApi> = Arc::new(NoRemote);
            let engine = Engine::new(db.clone(), Arc::clone(&remote), RateLimiter::new(10.0, 1), Arc::clone(&cfg));
            let follows = FollowScheduler::new(ChapterChecker::new(db.clone(), remote, cfg), Duration::from_secs(60));

            let job = db
                .insert_job(&NewJob {
                    source_url: "https://mangadex.org/title/foo".to_string(),
                    title: "Foo".to_string(),
                    library: String::new(),
                    language: "en".to_string(),
                    priority: 5,
                    max_retries: 3,
                    origin: JobOrigin::Manual,
                })
                .await
                .unwrap();

            let reply = ControlCommand::Cancel(job.id).apply(&engine, &follows).await;
            assert!(matches!(reply, ControlReply::Ok(_)), "{reply:?}");
            assert_eq!(db.get_job(job.id).await.unwrap().unwrap().status, JobStatus::Cancelled);

            // Terminal: a second cancel is refused.
            let reply = ControlCommand::Cancel(job.id).apply(&engine, &follows).await;
            assert!(matches!(reply, ControlReply::Err(_)));

            let reply = ControlCommand::Delete(job.id).apply(&engine, &follows).await;
            assert_eq!(reply, ControlReply::Ok(format!("job {} deleted", job.id)));
            let reply = ControlCommand::Delete(job.id).apply(&engine, &follows).await;
            assert!(matches!(reply, ControlReply::Err(_)));

            let reply = ControlCommand::Check.apply(&engine, &follows).await;
            assert_eq!(reply, ControlReply::Ok("check requested".to_string()));
        }
    }
}
