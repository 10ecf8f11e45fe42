//! Process-wide minimum-interval gate for outbound model calls.
//!
//! One [`RateLimiter`] is constructed per process and shared by handle
//! (`Arc<RateLimiter>`) with every job and every stage. Callers are never
//! rejected; they queue on an internal mutex and wait until `min_interval`
//! has passed since the previous grant.
//!
//! Time is read from tokio's clock, so tests pause it
//! (`#[tokio::test(start_paused = true)]`) instead of sleeping for real.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

pub struct RateLimiter {
    min_interval: Duration,
    /// Time of the last granted `acquire()`. Only written while the lock is held.
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for a slot and return the instant at which it was granted.
    ///
    /// The lock is held across the wait so concurrent callers are served one
    /// at a time, in arrival order.
    pub async fn acquire(&self) -> Instant {
        let mut last_call = self.last_call.lock().await;

        if let Some(previous) = *last_call {
            let ready_at = previous + self.min_interval;
            let now = Instant::now();
            if ready_at > now {
                debug!(
                    wait_ms = u64::try_from((ready_at - now).as_millis()).unwrap_or(u64::MAX),
                    "rate limiter holding call"
                );
                sleep_until(ready_at).await;
            }
        }

        let granted = Instant::now();
        *last_call = Some(granted);
        granted
    }

    /// Time of the most recent grant, if any.
    pub async fn last_call(&self) -> Option<Instant> {
        *self.last_call.lock().await
    }
}
