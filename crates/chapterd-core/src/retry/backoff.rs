//! Job-level cooldown before a FAILED job is re-admitted to the queue.

use std::time::Duration;

/// Linear cooldown `(retry_count + 1) * base`, measured from the job's last
/// modification, bounded by the job's own `max_retries`.
#[derive(Debug, Clone, Copy)]
pub struct JobBackoff {
    pub base: Duration,
}

impl JobBackoff {
    pub fn new(base: Duration) -> Self {
        Self { base }
    }

    /// Cooldown that must elapse before retry number `retry_count + 1`.
    pub fn cooldown(&self, retry_count: u32) -> Duration {
        self.base.saturating_mul(retry_count.saturating_add(1))
    }

    /// Whether a FAILED job with these counters may be retried automatically at `now`
    /// (all timestamps in Unix seconds).
    pub fn is_due(&self, retry_count: u32, max_retries: u32, modified_at: i64, now: i64) -> bool {
        if retry_count >= max_retries {
            return false;
        }
        let elapsed = now.saturating_sub(modified_at).max(0) as u64;
        elapsed >= self.cooldown(retry_count).as_secs()
    }
}
