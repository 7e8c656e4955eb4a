//! Retry logic for transient backing-store failures.
//!
//! Retries use exponential backoff with jitter, capped at
//! [`MAX_RETRY_ELAPSED`] of total elapsed time. Non-transient errors
//! (not-found, config, payload) are returned immediately.

use crate::error::StorageResult;
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};

/// Maximum total time spent retrying a single operation.
pub(crate) const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(30);

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(8);

/// Execute `operation` with automatic retry on transient errors.
pub(crate) async fn with_retry<F, Fut, T>(
    operation_name: &str,
    mut operation: F,
) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let started = Instant::now();
    let mut backoff = INITIAL_BACKOFF;
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "operation succeeded after retry",
                    );
                }
                return Ok(value);
            }
            Err(err) => {
                let delay = backoff
                    + backoff.mul_f64(rand::thread_rng().gen_range(0.0..0.5));
                if !err.is_transient() || started.elapsed() + delay > MAX_RETRY_ELAPSED {
                    return Err(err);
                }
                tracing::warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "transient storage error, retrying",
                );
                tokio::time::sleep(delay).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(StorageError::Http("connection reset".to_string()))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let result: StorageResult<()> = with_retry("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::NotFound("gone".to_string()))
        })
        .await;

        assert!(matches!(result, Err(StorageError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
