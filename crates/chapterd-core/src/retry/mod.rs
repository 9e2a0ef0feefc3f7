//! Retry and backoff policy.
//!
//! Two layers share the same error classification: per-request retries for
//! remote API calls (`RetryPolicy`) and the job-level cooldown the engine applies
//! before re-admitting a FAILED job (`JobBackoff`).

mod backoff;
mod classify;
mod policy;

pub use backoff::JobBackoff;
pub use classify::{classify_curl_error, classify_http_status};
pub use policy::{ErrorKind, FailureKind, RetryDecision, RetryPolicy};

use std::future::Future;

/// Runs an async operation until it succeeds or the retry policy says to stop.
/// On retryable failure, sleeps for the backoff duration then tries again.
pub async fn run_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    classify: impl Fn(&E) -> ErrorKind,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1u32;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => match policy.decide(attempt, classify(&e)) {
                RetryDecision::NoRetry => return Err(e),
                RetryDecision::RetryAfter(d) => {
                    tracing::debug!(attempt, delay_ms = d.as_millis() as u64, "retrying: {}", e);
                    tokio::time::sleep(d).await;
                    attempt += 1;
                }
            },
        }
    }
}
