//! Bounded retries with exponential backoff.
//!
//! [`RetryPolicy::execute`] wraps any operation returning a result whose error
//! can be classified as transient or fatal. Transient errors are retried up to
//! `max_attempts` total attempts; fatal errors propagate at once. The backoff
//! sleep is added on top of whatever spacing the rate limiter imposes.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{FailureKind, StageFailure};

/// Errors the retry policy knows how to classify.
pub trait Classify {
    fn kind(&self) -> FailureKind;
}

impl Classify for StageFailure {
    fn kind(&self) -> FailureKind {
        self.kind
    }
}

/// Why [`RetryPolicy::execute`] gave up. Both variants are fatal to the caller.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("{0}")]
    Fatal(E),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    /// The last error observed.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Fatal(err) => err,
            RetryError::Exhausted { last, .. } => last,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound for any single backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff after the given failed attempt (1-based).
    /// delay = base_delay * 2^(attempt - 1), capped at max_delay
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails fatally, or the attempt
    /// ceiling is reached. The operation receives the 1-based attempt number.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.kind() == FailureKind::Fatal => {
                    return Err(RetryError::Fatal(err));
                }
                Err(err) if attempt >= max_attempts => {
                    warn!(attempt, error = %err, "retry budget exhausted");
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
                Err(err) => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        }
    }

    /// Fails transiently `failures` times, then succeeds.
    fn flaky(
        failures: u32,
        calls: Arc<AtomicU32>,
    ) -> impl FnMut(u32) -> std::future::Ready<Result<u32, StageFailure>> {
        move |attempt| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            assert_eq!(n, attempt);
            if n <= failures {
                std::future::ready(Err(StageFailure::transient("throttled")))
            } else {
                std::future::ready(Ok(attempt))
            }
        }
    }

    #[test]
    fn exponential_backoff() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(8000));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = policy(10);
        assert_eq!(policy.delay_for_attempt(8), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = policy(3).execute(flaky(2, calls.clone())).await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn always_transient_exhausts_ceiling() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = policy(3).execute(flaky(u32::MAX, calls.clone())).await;

        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(last.is_transient());
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = policy(3)
            .execute(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                std::future::ready(Err(StageFailure::fatal("unauthorized")))
            })
            .await;

        assert!(matches!(result, Err(RetryError::Fatal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_sleeps_between_attempts() {
        let start = Instant::now();
        let calls = Arc::new(AtomicU32::new(0));
        policy(3).execute(flaky(2, calls)).await.unwrap();

        // 100ms after attempt 1, 200ms after attempt 2.
        assert!(Instant::now() - start >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ceiling_still_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = policy(0).execute(flaky(u32::MAX, calls.clone())).await;

        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn into_inner_returns_last_error() {
        let err: RetryError<StageFailure> = RetryError::Exhausted {
            attempts: 3,
            last: StageFailure::transient("timeout"),
        };
        assert_eq!(err.to_string(), "gave up after 3 attempts: TRANSIENT failure: timeout");
        assert_eq!(err.into_inner().message, "timeout");
    }
}
