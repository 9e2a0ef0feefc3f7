//! CLI command handlers, one file per command.

mod add;
mod check;
mod completions;
mod follow;
mod jobs;
mod list;
mod run;

pub use add::run_add;
pub use check::run_check;
pub use completions::{run_completions, run_man};
pub use follow::run_follow;
pub use jobs::{run_cancel, run_clear, run_delete, run_retry};
pub use list::run_list;
pub use run::run_daemon;

use chapterd_core::config::ChapterdConfig;
use chapterd_core::rate_limit::RateLimiter;
use chapterd_core::remote::{MangaDexClient, RemoteApi};
use chapterd_core::retry::RetryPolicy;
use std::sync::Arc;

/// Remote API client sharing `limiter` with everything else in this process.
fn remote_client(cfg: &ChapterdConfig, limiter: RateLimiter) -> Arc<dyn RemoteApi> {
    let retry = cfg
        .retry
        .as_ref()
        .map(RetryPolicy::from_config)
        .unwrap_or_default();
    Arc::new(MangaDexClient::new(&cfg.remote, retry, limiter))
}
