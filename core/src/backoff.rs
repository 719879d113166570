//! Exponential retry for startup connections (token exchange, store connect).
//!
//! The ingestion loop never uses this: its pacing is the fixed inter-request
//! delay of the query.

use crate::config::StartupConfig;
use backoff::backoff::Backoff;
use backoff::exponential::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl From<&StartupConfig> for RetryPolicy {
    fn from(config: &StartupConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }
}

fn exponential(policy: RetryPolicy) -> ExponentialBackoff<backoff::SystemClock> {
    ExponentialBackoff {
        current_interval: policy.base_delay,
        initial_interval: policy.base_delay,
        randomization_factor: 0.5,
        multiplier: 2.0,
        max_interval: Duration::from_secs(60),
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    }
}

pub async fn retry_with_backoff<F, Fut, T, E>(
    operation: F,
    policy: RetryPolicy,
    operation_name: &str,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut backoff = exponential(policy);
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(
                        operation = operation_name,
                        attempts, "Operation succeeded after retries"
                    );
                }
                return Ok(result);
            }
            Err(e) if attempts >= policy.max_attempts => {
                warn!(
                    operation = operation_name,
                    attempts,
                    error = %e,
                    "Operation failed after max retries"
                );
                return Err(e);
            }
            Err(e) => {
                let Some(duration) = backoff.next_backoff() else {
                    return Err(e);
                };
                warn!(
                    operation = operation_name,
                    attempt = attempts,
                    retry_after_ms = duration.as_millis(),
                    error = %e,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(duration).await;
            }
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
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry_with_backoff(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(format!("attempt {n} refused"))
                } else {
                    Ok(n)
                }
            },
            fast(5),
            "connect",
        )
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry_with_backoff(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("connection refused".to_string())
            },
            fast(2),
            "connect",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn zero_retries_still_makes_one_attempt() {
        let policy = RetryPolicy::from(&StartupConfig {
            max_retries: 0,
            retry_base_delay_ms: 10,
        });
        assert_eq!(policy.max_attempts, 1);
    }
}
