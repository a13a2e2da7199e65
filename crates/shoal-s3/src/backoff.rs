//! Exponential backoff for transient object store failures.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::store::StoreError;

/// Retry schedule for object store calls.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Multiplier applied to the delay after every retry.
    pub factor: u32,
    /// Upper bound on the delay.
    pub cap: Duration,
    /// Total attempts, including the first.
    pub attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(5),
            factor: 2,
            cap: Duration::from_secs(60),
            attempts: 5,
        }
    }
}

/// Run `op` under the policy, retrying only transient failures (HTTP 429
/// and transport status 0). The last error is returned once attempts are
/// exhausted; hard errors return immediately.
pub async fn retry<T, F, Fut>(
    policy: BackoffPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut delay = policy.initial;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.attempts => {
                warn!(
                    operation,
                    attempt,
                    status = err.status,
                    delay_ms = delay.as_millis() as u64,
                    "transient object store failure; backing off"
                );
                tokio::time::sleep(delay).await;
                delay = (delay * policy.factor).min(policy.cap);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick() -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(1),
            factor: 2,
            cap: Duration::from_millis(4),
            attempts: 5,
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry(quick(), "put", || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(StoreError::http(429, "slow down"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn hard_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry(quick(), "put", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::http(403, "forbidden")) }
        })
        .await;
        assert_eq!(result.unwrap_err().status, 403);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry(quick(), "put", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::transport("down")) }
        })
        .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }
}
