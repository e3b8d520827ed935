//! Bounded retry with jittered exponential backoff
//!
//! Used by read paths that compose two separately written entries (a
//! character and its image) where the second may not be visible yet.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::StoreResult;

/// Retry schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub attempts: u32,
    /// Delay before the second attempt; doubles on each further attempt
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay to sleep after failed attempt number `attempt` (1-based).
    ///
    /// The result lies in `[d/2, d]` where `d = min(base * 2^(attempt-1), max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let full = self
            .base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay);
        let full_ms = full.as_millis() as u64;
        if full_ms < 2 {
            return full;
        }
        let half = full_ms / 2;
        Duration::from_millis(half + rand::rng().random_range(0..=half))
    }
}

/// Run `op` until it yields `Ok(Some(_))`, at most `policy.attempts` times.
///
/// `Ok(None)` ("not visible yet") and errors are both retried. When every
/// attempt is used up the last outcome is returned: `Ok(None)` or the last
/// error.
pub async fn retry_until_some<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> StoreResult<Option<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = StoreResult<Option<T>>>,
{
    let attempts = policy.attempts.max(1);
    let mut last = Ok(None);

    for attempt in 1..=attempts {
        match op(attempt).await {
            Ok(Some(value)) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Succeeded after retry");
                }
                return Ok(Some(value));
            }
            Ok(None) => {
                debug!(operation, attempt, "Not available yet");
                last = Ok(None);
            }
            Err(e) => {
                warn!(operation, attempt, error = %e, "Attempt failed");
                last = Err(e);
            }
        }

        if attempt < attempts {
            tokio::time::sleep(policy.delay_for(attempt)).await;
        }
    }

    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_delay_grows_and_is_bounded() {
        let policy = fast_policy();
        for _ in 0..20 {
            let first = policy.delay_for(1);
            assert!(first >= Duration::from_millis(5) && first <= Duration::from_millis(10));
            let third = policy.delay_for(3);
            assert!(third >= Duration::from_millis(20) && third <= Duration::from_millis(40));
            let capped = policy.delay_for(30);
            assert!(capped <= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_first_success() {
        let calls = AtomicU32::new(0);
        let result = retry_until_some(&fast_policy(), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(Some(7)) }
        })
        .await
        .unwrap();

        assert_eq!(result, Some(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_visible() {
        let result = retry_until_some(&fast_policy(), "test", |attempt| async move {
            if attempt < 3 {
                Ok(None)
            } else {
                Ok(Some("image"))
            }
        })
        .await
        .unwrap();

        assert_eq!(result, Some("image"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_bounded_attempts() {
        let calls = AtomicU32::new(0);
        let result: Option<u8> = retry_until_some(&fast_policy(), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(None) }
        })
        .await
        .unwrap();

        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_error_is_returned() {
        let result: StoreResult<Option<u8>> = retry_until_some(&fast_policy(), "test", |attempt| async move {
            Err(StoreError::Network(format!("attempt {}", attempt)))
        })
        .await;

        assert!(matches!(result, Err(StoreError::Network(ref m)) if m == "attempt 3"));
    }
}
