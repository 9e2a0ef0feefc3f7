//! Process runner: one external download-tool subprocess per active job.
//!
//! `start` spawns the tool, forwards its stdout events on a channel, keeps the
//! tail of its stderr and waits for it to exit. `cancel` and `kill` send
//! SIGKILL to the tool's process group; they never wait for the tool to notice.

mod command;
mod events;

pub use command::{build_args, substitute, ToolInvocation};
pub use events::ToolEvent;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::{mpsc, Notify};

use crate::config::ToolConfig;
use crate::history::archive::ARCHIVE_EXT;
use crate::store::JobId;

/// How long to wait for output readers after the tool exits.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("job {0} already has a live subprocess")]
    AlreadyRunning(JobId),
    #[error("failed to spawn {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("subprocess I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// How one tool run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Exit status 0. `archive` is the file the tool reported, or the newest
    /// archive written to the destination during the run.
    Success { archive: Option<PathBuf> },
    /// Non-zero exit (or death by an outside signal) with the stderr tail.
    Failed { code: Option<i32>, stderr: String },
    /// Terminated through `cancel`/`kill`.
    Killed,
}

struct LiveProcess {
    pid: Option<u32>,
    kill: Arc<Notify>,
}

pub struct ProcessRunner {
    tool: ToolConfig,
    stderr_limit: usize,
    live: Mutex<HashMap<JobId, LiveProcess>>,
}

impl ProcessRunner {
    pub fn new(tool: ToolConfig, stderr_limit: usize) -> Self {
        Self {
            tool,
            stderr_limit: stderr_limit.max(1),
            live: Mutex::new(HashMap::new()),
        }
    }

    fn live(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, LiveProcess>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self, job_id: JobId) -> bool {
        self.live().contains_key(&job_id)
    }

    /// Runs the tool for one invocation and waits for it to exit.
    ///
    /// Events parsed from stdout are sent on `events` as they arrive; a closed
    /// receiver is ignored. Starting a job that already has a live subprocess
    /// is an error.
    pub async fn start(
        &self,
        inv: &ToolInvocation,
        events: mpsc::UnboundedSender<ToolEvent>,
    ) -> Result<RunOutcome, RunnerError> {
        self.start_with_cancel(inv, events, &AtomicBool::new(false))
            .await
    }

    /// Like [`start`](Self::start), tied to the job's cancellation flag.
    ///
    /// The flag is read after the job is registered as live. A cancel that
    /// sets the flag and then finds no live entry has therefore run before
    /// registration, and the tool is never spawned.
    pub async fn start_with_cancel(
        &self,
        inv: &ToolInvocation,
        events: mpsc::UnboundedSender<ToolEvent>,
        cancelled: &AtomicBool,
    ) -> Result<RunOutcome, RunnerError> {
        let kill = Arc::new(Notify::new());
        {
            let mut live = self.live();
            if live.contains_key(&inv.job_id) {
                return Err(RunnerError::AlreadyRunning(inv.job_id));
            }
            live.insert(
                inv.job_id,
                LiveProcess {
                    pid: None,
                    kill: Arc::clone(&kill),
                },
            );
        }
        let result = if cancelled.load(Ordering::SeqCst) {
            tracing::debug!(job_id = inv.job_id, "cancelled before spawn");
            Ok(RunOutcome::Killed)
        } else {
            self.run(inv, events, &kill).await
        };
        self.live().remove(&inv.job_id);
        result
    }

    async fn run(
        &self,
        inv: &ToolInvocation,
        events: mpsc::UnboundedSender<ToolEvent>,
        kill: &Notify,
    ) -> Result<RunOutcome, RunnerError> {
        let started = SystemTime::now();
        tokio::fs::create_dir_all(&inv.dest).await?;
        let mut cmd = command::build_command(&self.tool, inv);
        tracing::debug!(job_id = inv.job_id, url = %inv.url, "spawning {}", self.tool.program);
        let mut child = cmd.spawn().map_err(|source| RunnerError::Spawn {
            program: self.tool.program.clone(),
            source,
        })?;
        let pid = child.id();
        if let Some(entry) = self.live().get_mut(&inv.job_id) {
            entry.pid = pid;
        }

        let stdout_task = child.stdout.take().map(|out| {
            let job_id = inv.job_id;
            tokio::spawn(read_events(job_id, out, events))
        });
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(read_tail(err, self.stderr_limit)));

        let mut killed = false;
        let status = tokio::select! {
            status = child.wait() => status?,
            _ = kill.notified() => {
                killed = true;
                force_kill(&mut child, pid);
                child.wait().await?
            }
        };

        let reported = match stdout_task {
            Some(task) => drain(task).await.flatten(),
            None => None,
        };
        let stderr = match stderr_task {
            Some(task) => drain(task).await.unwrap_or_default(),
            None => String::new(),
        };

        if killed {
            tracing::info!(job_id = inv.job_id, "subprocess killed");
            return Ok(RunOutcome::Killed);
        }
        if !status.success() {
            tracing::warn!(job_id = inv.job_id, code = ?status.code(), "tool failed");
            return Ok(RunOutcome::Failed {
                code: status.code(),
                stderr,
            });
        }

        let archive = match reported {
            Some(file) if file.is_absolute() => Some(file),
            Some(file) => Some(inv.dest.join(file)),
            None => {
                let dest = inv.dest.clone();
                tokio::task::spawn_blocking(move || newest_archive_since(&dest, started))
                    .await
                    .ok()
                    .flatten()
            }
        };
        Ok(RunOutcome::Success { archive })
    }

    /// Forcibly terminates the job's subprocess. Returns false if none is live.
    pub fn cancel(&self, job_id: JobId) -> bool {
        self.kill(job_id)
    }

    /// Sends SIGKILL to the job's subprocess group right away; the waiting
    /// `start` call then reaps it and returns [`RunOutcome::Killed`].
    pub fn kill(&self, job_id: JobId) -> bool {
        let live = self.live();
        let Some(proc) = live.get(&job_id) else {
            return false;
        };
        signal_group(proc.pid);
        proc.kill.notify_one();
        true
    }

    /// Kills every live subprocess (shutdown). Returns how many were signalled.
    pub fn kill_all(&self) -> usize {
        let live = self.live();
        for proc in live.values() {
            signal_group(proc.pid);
            proc.kill.notify_one();
        }
        live.len()
    }
}

#[cfg(unix)]
fn signal_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        // The child leads its own process group (see build_command).
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: Option<u32>) {}

fn force_kill(child: &mut tokio::process::Child, pid: Option<u32>) {
    signal_group(pid);
    if let Err(e) = child.start_kill() {
        tracing::debug!("start_kill: {e}");
    }
}

async fn drain<T>(task: tokio::task::JoinHandle<T>) -> Option<T> {
    let abort = task.abort_handle();
    match tokio::time::timeout(DRAIN_TIMEOUT, task).await {
        Ok(Ok(v)) => Some(v),
        Ok(Err(_)) => None,
        Err(_) => {
            abort.abort();
            None
        }
    }
}

/// Forwards stdout events; returns the last `done` file reported.
async fn read_events<R: AsyncRead + Unpin>(
    job_id: JobId,
    out: R,
    events: mpsc::UnboundedSender<ToolEvent>,
) -> Option<PathBuf> {
    let mut lines = BufReader::new(out).lines();
    let mut done = None;
    while let Ok(Some(line)) = lines.next_line().await {
        match ToolEvent::parse_line(&line) {
            Some(ev) => {
                if let ToolEvent::Done { file } = &ev {
                    done = Some(file.clone());
                }
                let _ = events.send(ev);
            }
            None => tracing::debug!(job_id, "tool: {}", line),
        }
    }
    done
}

/// Reads to EOF keeping only the last `limit` bytes.
async fn read_tail<R: AsyncRead + Unpin>(mut err: R, limit: usize) -> String {
    let mut tail: Vec<u8> = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match err.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > limit * 2 {
                    tail.drain(..tail.len() - limit);
                }
            }
        }
    }
    truncate_tail(&String::from_utf8_lossy(&tail), limit)
}

/// Last `limit` bytes of `s`, cut on a char boundary, trimmed.
pub fn truncate_tail(s: &str, limit: usize) -> String {
    let s = s.trim();
    if s.len() <= limit {
        return s.to_string();
    }
    let mut start = s.len() - limit;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].trim_start().to_string()
}

/// Newest archive in `dir` modified at or after `since`.
pub fn newest_archive_since(dir: &Path, since: SystemTime) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(ARCHIVE_EXT))
        })
        .filter_map(|p| {
            let modified = std::fs::metadata(&p).and_then(|m| m.modified()).ok()?;
            (modified >= since).then_some((modified, p))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, p)| p)
}

#[cfg(all(test, unix))]
mod tests;
