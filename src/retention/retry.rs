//! Batch-level retry with exponential backoff.

use std::future::Future;

use tracing::{debug, warn};

use crate::{clients::ServiceError, config::RetryConfig};

/// Execute a service call, retrying transient failures.
///
/// Permanent failures return immediately. Returns the last error once the
/// configured attempts are exhausted.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T, ServiceError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    if !config.enabled {
        return operation().await;
    }

    let max_attempts = config.max_retries + 1; // +1 for initial attempt
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(error) => {
                if error.is_transient() && attempt + 1 < max_attempts {
                    let delay = config.delay_for_attempt(attempt);
                    warn!(
                        operation = operation_name,
                        error = %error,
                        attempt = attempt + 1,
                        max_attempts = max_attempts,
                        delay_ms = delay.as_millis(),
                        "Retryable error, will retry after delay"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }

                if attempt > 0 {
                    warn!(
                        operation = operation_name,
                        error = %error,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts"
                    );
                }

                return Err(error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            enabled: true,
            max_retries,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
            jitter: 0.0,
        }
    }

    fn unavailable() -> ServiceError {
        ServiceError::Unavailable {
            service: "msg",
            message: "connection reset".into(),
        }
    }

    #[tokio::test]
    async fn test_succeeds_first_attempt() {
        let attempts = AtomicU32::new(0);
        let result = with_retry(&fast_config(3), "test_op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, ServiceError>(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let result = with_retry(&fast_config(3), "test_op", || {
            let count = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err(unavailable())
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_retries() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_config(2), "test_op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(unavailable()) }
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_config(5), "test_op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ServiceError::Rejected {
                    service: "msg",
                    message: "invalid seqs".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_makes_single_attempt() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig {
            enabled: false,
            ..fast_config(5)
        };
        let result: Result<(), _> = with_retry(&config, "test_op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(unavailable()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
