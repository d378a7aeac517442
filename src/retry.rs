//! Retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::ClientError;

/// How many times to retry and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before the `retry`-th retry (1-indexed): `base_delay * 2^(retry-1)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the policy is exhausted. The last error is returned on exhaustion.
pub async fn execute_with_retry<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let max_attempts = policy.max_retries.saturating_add(1);
    let mut attempt = 0u32;

    loop {
        if attempt > 0 {
            let wait = policy.delay_for(attempt);
            debug!(attempt, wait_ms = wait.as_millis() as u64, "Waiting before retry");
            sleep(wait).await;
        }
        attempt += 1;

        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if error.is_aborted() || !error.is_retryable() {
                    return Err(error);
                }
                if attempt >= max_attempts {
                    warn!(attempts = attempt, error = %error, "Retries exhausted");
                    return Err(error);
                }
                debug!(attempt, error = %error, "Retryable failure");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[test]
    fn test_delay_for() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
        assert_eq!(RetryPolicy::none().delay_for(5), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_server_faults() {
        let calls = AtomicU32::new(0);
        let stamps = Mutex::new(Vec::new());
        let policy = RetryPolicy::default();

        let result = execute_with_retry(&policy, || {
            stamps.lock().unwrap().push(Instant::now());
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ClientError::api(500, "boom", None))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let stamps = stamps.lock().unwrap();
        let first = stamps[1] - stamps[0];
        let second = stamps[2] - stamps[1];
        assert!(first >= Duration::from_millis(1000) && first < Duration::from_millis(1010));
        assert!(second >= Duration::from_millis(2000) && second < Duration::from_millis(2010));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(10));

        let err = execute_with_retry(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Err::<(), _>(ClientError::api(503, format!("attempt {n}"), None)) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(err.message(), "attempt 3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_fast() {
        for error in [
            ClientError::api(400, "bad", None),
            ClientError::api(401, "key", None),
            ClientError::api(403, "forbidden", None),
            ClientError::aborted("cancelled"),
        ] {
            let calls = AtomicU32::new(0);
            let mut error = Some(error);
            let result = execute_with_retry(&RetryPolicy::default(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                let error = error.take();
                async move { Err::<(), _>(error.unwrap_or_else(|| ClientError::Transport("again".into()))) }
            })
            .await;

            assert!(result.is_err());
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_retry() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(1, Duration::from_millis(5));

        let result = execute_with_retry(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ClientError::Transport("connection reset".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
    }
}
