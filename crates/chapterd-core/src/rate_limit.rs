//! Request budget for the remote API.
//!
//! A token bucket with continuous refill shared by the chapter checker and the
//! executor. `acquire` waits for a token instead of failing, so callers are
//! throttled, never dropped.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

#[derive(Debug)]
struct Bucket {
    capacity: f64,
    tokens: f64,
    tokens_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.tokens_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Takes a token, or returns how long until one is available.
    fn take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(missing / self.tokens_per_sec))
        }
    }
}

/// Cloneable handle; clones share one bucket.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    bucket: Arc<Mutex<Bucket>>,
}

impl RateLimiter {
    /// `requests_per_sec` is clamped to a small positive minimum; `burst` to at least 1.
    pub fn new(requests_per_sec: f64, burst: u32) -> Self {
        let capacity = burst.max(1) as f64;
        let rate = if requests_per_sec.is_finite() {
            requests_per_sec.max(0.01)
        } else {
            capacity
        };
        Self {
            bucket: Arc::new(Mutex::new(Bucket {
                capacity,
                tokens: capacity,
                tokens_per_sec: rate,
                last_refill: Instant::now(),
            })),
        }
    }

    pub fn from_config(cfg: &RateLimitConfig) -> Self {
        Self::new(cfg.requests_per_sec, cfg.burst)
    }

    /// Waits until a request may be issued.
    ///
    /// The lock is released while sleeping so other waiters can re-check; FIFO
    /// fairness is not guaranteed.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                match bucket.take(Instant::now()) {
                    Ok(()) => return,
                    Err(wait) => wait,
                }
            };
            tracing::trace!(wait_ms = wait.as_millis() as u64, "rate limited");
            tokio::time::sleep(wait).await;
        }
    }

    /// Takes a token only if one is available right now.
    pub async fn try_acquire(&self) -> bool {
        self.bucket.lock().await.take(Instant::now()).is_ok()
    }
}
