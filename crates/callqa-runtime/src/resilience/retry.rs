//! Retry with bounded exponential backoff.
//!
//! An operation runs up to `max_retries + 1` times. The delay before retry
//! `k` (1-based) is `min(base_delay * 2^(k-1), max_delay)` for exponential
//! backoff, or `base_delay` for constant backoff.
//!
//! Two optional time limits apply:
//! - `timeout`: overall wall clock from the first attempt, checked before
//!   every retry. Crossing it ends the run with [`RetryError::TimeoutExceeded`]
//!   carrying the last error.
//! - `attempt_timeout`: each attempt is cut off after this long and counts
//!   as a failed attempt with an [`AttemptTimedOut`] error.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::{duration_str, option_duration_str};

/// Delay growth between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Double the delay after every failure, capped at `max_delay`
    #[default]
    Exponential,
    /// Always wait `base_delay`
    Constant,
}

/// How an operation is retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    #[serde(with = "duration_str")]
    pub base_delay: Duration,

    #[serde(with = "duration_str", default = "default_max_delay")]
    pub max_delay: Duration,

    #[serde(default)]
    pub backoff: Backoff,

    /// Overall budget measured from the first attempt
    #[serde(with = "option_duration_str", default)]
    pub timeout: Option<Duration>,

    /// Limit for a single attempt
    #[serde(with = "option_duration_str", default)]
    pub attempt_timeout: Option<Duration>,
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// Exponential policy with a 60s delay cap and no time limits.
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: default_max_delay(),
            backoff: Backoff::Exponential,
            timeout: None,
            attempt_timeout: None,
        }
    }

    /// Constant-delay policy.
    pub fn constant(max_retries: u32, delay: Duration) -> Self {
        Self {
            backoff: Backoff::Constant,
            ..Self::new(max_retries, delay)
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Total attempts allowed, first attempt included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry `k`, 1-based.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay = match self.backoff {
            Backoff::Constant => self.base_delay,
            Backoff::Exponential => 1u32
                .checked_shl(retry.saturating_sub(1))
                .and_then(|factor| self.base_delay.checked_mul(factor))
                .unwrap_or(self.max_delay),
        };
        delay.min(self.max_delay)
    }
}

/// A single attempt ran past its limit.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("attempt timed out after {0:?}")]
pub struct AttemptTimedOut(pub Duration);

/// Why a retried operation gave up.
#[derive(Error, Debug)]
pub enum RetryError<E> {
    /// Every attempt failed; holds the last attempt's error unchanged
    #[error("{0}")]
    Exhausted(E),

    /// The overall timeout passed before the next attempt could start
    #[error("timed out after {elapsed:?} and {attempts} attempt(s): {last}")]
    TimeoutExceeded {
        last: E,
        attempts: u32,
        elapsed: Duration,
    },
}

impl<E> RetryError<E> {
    /// The last error observed, whichever way the run ended.
    pub fn last_error(&self) -> &E {
        match self {
            RetryError::Exhausted(e) => e,
            RetryError::TimeoutExceeded { last, .. } => last,
        }
    }

    pub fn into_last_error(self) -> E {
        match self {
            RetryError::Exhausted(e) => e,
            RetryError::TimeoutExceeded { last, .. } => last,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RetryError::TimeoutExceeded { .. })
    }
}

/// Runs operations under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `operation` until it succeeds or the policy gives up.
    ///
    /// Every error is retried. `label` names the operation in logs.
    pub async fn execute<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<AttemptTimedOut> + std::fmt::Display,
    {
        let start = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let outcome = match self.policy.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, operation()).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(E::from(AttemptTimedOut(limit))),
                },
                None => operation().await,
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(operation = label, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if attempt >= self.policy.max_attempts() {
                tracing::warn!(
                    operation = label,
                    attempts = attempt,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(RetryError::Exhausted(err));
            }

            let delay = self.policy.delay_for(attempt);
            tracing::info!(
                operation = label,
                attempt,
                max_attempts = self.policy.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after failure"
            );
            tokio::time::sleep(delay).await;

            if let Some(timeout) = self.policy.timeout {
                let elapsed = start.elapsed();
                if elapsed > timeout {
                    tracing::warn!(
                        operation = label,
                        attempts = attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Retry timeout exceeded"
                    );
                    return Err(RetryError::TimeoutExceeded {
                        last: err,
                        attempts: attempt,
                        elapsed,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq, Eq)]
    enum TestError {
        Flaky(u32),
        TimedOut,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl From<AttemptTimedOut> for TestError {
        fn from(_: AttemptTimedOut) -> Self {
            TestError::TimedOut
        }
    }

    fn fast(max_retries: u32) -> RetryExecutor {
        RetryExecutor::new(RetryPolicy::new(max_retries, Duration::from_millis(100)))
    }

    #[test]
    fn test_backoff_curve() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(10_000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(7), Duration::from_millis(6_400));
        assert_eq!(policy.delay_for(8), Duration::from_millis(10_000));
        assert_eq!(policy.delay_for(64), Duration::from_millis(10_000));
    }

    #[test]
    fn test_constant_backoff() {
        let policy = RetryPolicy::constant(2, Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(5), Duration::from_secs(1));
    }

    #[test]
    fn test_policy_from_yaml() {
        let policy: RetryPolicy = serde_yaml::from_str(
            "max_retries: 3\nbase_delay: 5s\nmax_delay: 1m\ntimeout: 5m\n",
        )
        .unwrap();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(5));
        assert_eq!(policy.timeout, Some(Duration::from_secs(300)));
        assert_eq!(policy.backoff, Backoff::Exponential);
        assert_eq!(policy.attempt_timeout, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_k_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = fast(3)
            .execute("flaky", move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= 2 {
                    Err(TestError::Flaky(n))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_returns_last_error_unwrapped() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = fast(2)
            .execute("doomed", move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Err(TestError::Flaky(n))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(RetryError::Exhausted(e)) => assert_eq!(e, TestError::Flaky(3)),
            other => panic!("expected exhausted, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_follow_backoff() {
        let start = Instant::now();
        let _: Result<(), _> = fast(3)
            .execute("timed", || async { Err(TestError::Flaky(0)) })
            .await;
        // 100 + 200 + 400
        assert_eq!(start.elapsed(), Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_timeout_wraps_last_error() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new(
            RetryPolicy::new(10, Duration::from_secs(1)).with_timeout(Duration::from_secs(2)),
        );
        let counter = &calls;
        let result: Result<(), _> = executor
            .execute("slow", move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Err(TestError::Flaky(n))
            })
            .await;

        // Attempts at t=0 and t=1s; after the 2s wait the budget is spent
        let err = result.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.last_error(), &TestError::Flaky(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_counts_as_failure() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new(
            RetryPolicy::new(1, Duration::from_millis(10))
                .with_attempt_timeout(Duration::from_secs(5)),
        );
        let counter = &calls;
        let result = executor
            .execute("hangs-once", move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 1 {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok::<_, TestError>(n)
            })
            .await;

        assert_eq!(result.unwrap(), 2);
    }

    proptest! {
        #[test]
        fn prop_delay_never_exceeds_cap(base_ms in 1u64..5_000, max_ms in 1u64..60_000, k in 1u32..100) {
            let policy = RetryPolicy::new(100, Duration::from_millis(base_ms))
                .with_max_delay(Duration::from_millis(max_ms));
            let delay = policy.delay_for(k);
            prop_assert!(delay <= Duration::from_millis(max_ms));
            prop_assert!(policy.delay_for(k + 1) >= delay);
        }
    }
}
