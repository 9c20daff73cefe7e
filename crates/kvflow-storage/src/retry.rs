//! Transport retry policy
//!
//! Only transient store failures are retried. Compare failures and
//! sentinel errors are returned to the caller unchanged, since retrying
//! them without re-reading state would just fail again.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StorageError;

/// Retry configuration for store calls
///
/// Delays grow by `backoff_coefficient` per retry, are capped at
/// `max_interval`, then spread by `jitter` in both directions.
///
/// ```
/// use kvflow_storage::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default()
///     .with_max_attempts(4)
///     .with_initial_interval(Duration::from_millis(20));
///
/// assert!(policy.has_attempts_remaining(3));
/// assert!(!policy.has_attempts_remaining(4));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Attempts in total, the first call included
    pub max_attempts: u32,
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,
    pub backoff_coefficient: f64,
    /// Relative spread, 0.1 means up to 10% either way
    pub jitter: f64,
}

impl Default for RetryPolicy {
    /// 3 attempts, 50ms doubling up to 1s, 10% jitter
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(50),
            max_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Sleep before `attempt` (1-based); the first attempt never waits
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let Some(retries) = attempt.checked_sub(2) else {
            return Duration::ZERO;
        };
        let cap = self.max_interval.as_secs_f64();
        let grown = self.initial_interval.as_secs_f64()
            * self.backoff_coefficient.powi(retries.min(i32::MAX as u32) as i32);
        let mut secs = if grown.is_finite() { grown.min(cap) } else { cap };

        let spread = self.jitter.clamp(0.0, 1.0);
        if spread > 0.0 && secs > 0.0 {
            secs *= rand::thread_rng().gen_range(1.0 - spread..=1.0 + spread);
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }
}

/// Run `f` until it succeeds, fails with a non-transient error, or the
/// policy runs out of attempts
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut f: F) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && policy.has_attempts_remaining(attempt) => {
                attempt += 1;
                let delay = policy.delay_for_attempt(attempt);
                warn!(attempt, ?delay, error = %err, "transient store error, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Bound a store call by `timeout`
pub async fn with_timeout<T, Fut>(timeout: Duration, fut: Fut) -> Result<T, StorageError>
where
    Fut: Future<Output = Result<T, StorageError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| StorageError::Timeout(timeout))?
}

/// Serde support for Duration as milliseconds
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fixed(interval: Duration, max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            backoff_coefficient: 1.0,
            ..RetryPolicy::default()
        }
        .with_initial_interval(interval)
        .with_max_attempts(max_attempts)
        .with_jitter(0.0)
    }

    #[test]
    fn test_delay_for_attempt() {
        let policy = RetryPolicy::default().with_jitter(0.0);

        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(50));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(1));
    }

    #[test]
    fn test_jittered_delay_stays_in_band() {
        let policy = RetryPolicy::default().with_jitter(0.5);
        for _ in 0..100 {
            let delay = policy.delay_for_attempt(3);
            assert!(delay >= Duration::from_millis(49) && delay <= Duration::from_millis(151));
        }
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let policy = RetryPolicy::default().with_max_attempts(0);
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.has_attempts_remaining(1));
    }

    #[test]
    fn test_serialization() {
        let policy = fixed(Duration::from_millis(250), 7);
        let json = serde_json::to_string(&policy).unwrap();
        assert!(json.contains("\"initial_interval\":250"));
        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, parsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_transient_then_succeed() {
        let calls = AtomicU32::new(0);
        let policy = fixed(Duration::from_millis(10), 3);

        let result = retry(&policy, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(StorageError::Unavailable("flaky".into()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_on_sentinel() {
        let calls = AtomicU32::new(0);
        let policy = fixed(Duration::ZERO, 5);

        let result: Result<(), _> = retry(&policy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::OperationConstraintViolated)
        })
        .await;

        assert!(matches!(
            result,
            Err(StorageError::OperationConstraintViolated)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout() {
        let result: Result<(), _> = with_timeout(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(StorageError::Timeout(_))));
    }
}
