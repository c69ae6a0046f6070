//! Retry with capped exponential backoff, and a helper that runs
//! non-critical cleanup without letting its failure mask the primary
//! error.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

/// Backoff policy for [`retry_with_backoff`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    /// Delay before the given retry (attempt is 1-based; attempt 1 is
    /// the first retry). Doubles per attempt, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .as_millis()
            .saturating_mul(1u128 << attempt.saturating_sub(1).min(32));
        Duration::from_millis(exp.min(self.max_delay.as_millis()) as u64)
    }
}

/// Run `op` until it succeeds or the policy is exhausted. The last
/// error is returned unchanged.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    return Err(e);
                }
                let delay = policy.delay_for(attempt);
                warn!(attempt, ?delay, error = %e, "operation failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Run a non-critical async operation, logging and swallowing its
/// error. Used on cleanup paths so the primary error stays the cause.
pub async fn safe<T, Fut>(context: &str, fut: Fut) -> Option<T>
where
    Fut: Future<Output = Result<T>>,
{
    match fut.await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(context, error = %e, "non-critical operation failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(5, Duration::from_millis(1));

        let calls2 = calls.clone();
        let result = retry_with_backoff(&policy, move || {
            let calls = calls2.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(anyhow::anyhow!("transient"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3, Duration::from_millis(1));

        let calls2 = calls.clone();
        let result: Result<()> = retry_with_backoff(&policy, move || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("permanent"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn safe_swallows_errors() {
        let ok = safe("cleanup", async { Ok::<_, anyhow::Error>(1) }).await;
        assert_eq!(ok, Some(1));

        let err = safe::<(), _>("cleanup", async { Err(anyhow::anyhow!("nope")) }).await;
        assert!(err.is_none());
    }
}
