//! Deadlines and bounded exponential backoff around runtime calls.

use std::future::Future;
use std::time::Duration;

use hostgrid_runtime::{RuntimeError, RuntimeResult};
use tracing::warn;

/// Bounded exponential backoff: `base_delay` doubling per attempt, capped at
/// `max_delay`, giving up after `max_attempts` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        (self.base_delay * factor).min(self.max_delay)
    }
}

/// Run `fut` with a deadline; expiry becomes `RuntimeError::Timeout`.
/// Dropping the returned future cancels the call.
pub async fn bounded<T, F>(deadline: Duration, what: &str, fut: F) -> RuntimeResult<T>
where
    F: Future<Output = RuntimeResult<T>>,
{
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| RuntimeError::Timeout(format!("{what} exceeded {deadline:?}")))?
}

/// Call `op` until it succeeds, fails permanently, or the policy's attempts
/// are spent. Only transient errors are retried.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> RuntimeResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RuntimeResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_after(attempt);
                warn!(what, attempt, ?delay, error = %err, "transient runtime failure, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(30), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry_transient(&fast(3), "inspect", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(RuntimeError::Connection("refused".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: RuntimeResult<()> = retry_transient(&fast(3), "inspect", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RuntimeError::Timeout("inspect".into()))
        })
        .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: RuntimeResult<()> = retry_transient(&fast(3), "inspect", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RuntimeError::NotFound("abc".into()))
        })
        .await;
        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bounded_times_out() {
        let result: RuntimeResult<()> = bounded(Duration::from_millis(10), "start", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(RuntimeError::Timeout(_))));
    }
}
