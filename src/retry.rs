//! Retry logic with exponential backoff
//!
//! Every delivery attempt goes through [`send_with_retry`], which reports how
//! many attempts were actually consumed alongside the final result. The wait
//! after the n-th failed attempt is `base_delay * 2^(n-1)`, capped at
//! [`RetryConfig::max_delay`] and optionally jittered.
//!
//! # Example
//!
//! ```no_run
//! use campaign_dispatch::retry::{IsRetryable, send_with_retry};
//! use campaign_dispatch::config::RetryConfig;
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() {
//! let config = RetryConfig::default();
//! let retried = send_with_retry(&config, 3, Duration::from_secs(1), || async {
//!     Ok::<_, MyError>(())
//! })
//! .await;
//! assert_eq!(retried.attempts, 1);
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::TransportError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, throttling, server errors) should return `true`.
/// Permanent failures (a request that can never be built) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for TransportError {
    fn is_retryable(&self) -> bool {
        match self {
            // Any non-accepted status is retried, as the delivery API gives no
            // reliable permanent/transient split
            TransportError::Http { .. } => true,
            TransportError::Network(_) => true,
            TransportError::Timeout => true,
            // Rebuilding the same request cannot succeed
            TransportError::InvalidRequest(_) => false,
            TransportError::Aborted(_) => false,
        }
    }
}

/// Final result of a retried operation and the attempts it took
#[derive(Debug)]
pub struct Retried<T, E> {
    /// Last result: the first success, or the last error
    pub result: Result<T, E>,
    /// Attempts actually made (at least 1, at most the attempt budget)
    pub attempts: u32,
}

/// Execute an async operation with exponential backoff retry logic
///
/// # Arguments
///
/// * `config` - Delay cap and jitter
/// * `max_attempts` - Attempt budget; values below 1 are treated as 1
/// * `base_delay` - Wait after the first failed attempt; doubles after each further failure
/// * `operation` - Async closure that returns `Result<T, E>` where `E` implements [`IsRetryable`]
///
/// Stops early on a non-retryable error.
pub async fn send_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    max_attempts: u32,
    base_delay: Duration,
    mut operation: F,
) -> Retried<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "operation succeeded after retry");
                }
                return Retried {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = backoff_delay(base_delay, attempt, config.max_delay);
                let delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis(),
                    "attempt failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "operation failed after all attempts"
                    );
                } else {
                    tracing::error!(error = %e, attempt, "operation failed with non-retryable error");
                }
                return Retried {
                    result: Err(e),
                    attempts: attempt,
                };
            }
        }
    }
}

/// Wait after failed attempt number `attempt` (1-based)
pub fn backoff_delay(base_delay: Duration, attempt: u32, max_delay: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base_delay
        .checked_mul(1u32 << exponent)
        .unwrap_or(max_delay)
        .min(max_delay)
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the
/// actual delay lands between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    delay.mul_f64(1.0 + jitter_factor)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Transient,
        Permanent,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Transient => write!(f, "transient error"),
                TestError::Permanent => write!(f, "permanent error"),
            }
        }
    }

    impl IsRetryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_success_no_retry() {
        let config = fast_config();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let retried = send_with_retry(&config, 3, config.base_delay, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(42)
            }
        })
        .await;

        assert_eq!(retried.result.unwrap(), 42);
        assert_eq!(retried.attempts, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "should only call once");
    }

    #[tokio::test]
    async fn test_retry_transient_then_succeed() {
        let config = fast_config();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let retried = send_with_retry(&config, 3, config.base_delay, || {
            let counter = counter_clone.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 { Err(TestError::Transient) } else { Ok(42) }
            }
        })
        .await;

        assert_eq!(retried.result.unwrap(), 42);
        assert_eq!(retried.attempts, 3);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_equal_budget() {
        let config = fast_config();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let retried = send_with_retry(&config, 2, config.base_delay, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Transient)
            }
        })
        .await;

        assert!(retried.result.is_err());
        assert_eq!(retried.attempts, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2, "budget is total attempts");
    }

    #[tokio::test]
    async fn test_permanent_error_no_retry() {
        let config = fast_config();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let retried = send_with_retry(&config, 5, config.base_delay, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Permanent)
            }
        })
        .await;

        assert!(retried.result.is_err());
        assert_eq!(retried.attempts, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "should not retry permanent error");
    }

    #[tokio::test]
    async fn test_zero_budget_still_attempts_once() {
        let config = fast_config();
        let retried = send_with_retry(&config, 0, config.base_delay, || async {
            Err::<i32, _>(TestError::Transient)
        })
        .await;
        assert_eq!(retried.attempts, 1);
    }

    #[tokio::test]
    async fn test_exponential_backoff() {
        let config = fast_config();
        let start = std::time::Instant::now();

        let retried = send_with_retry(&config, 3, Duration::from_millis(20), || async {
            Err::<i32, _>(TestError::Transient)
        })
        .await;

        let elapsed = start.elapsed();
        assert_eq!(retried.attempts, 3);

        // 20ms after the first failure, 40ms after the second; none after the last
        assert!(
            elapsed >= Duration::from_millis(60),
            "should wait at least 60ms, waited {:?}",
            elapsed
        );
        assert!(
            elapsed < Duration::from_secs(2),
            "should not wait too long, waited {:?}",
            elapsed
        );
    }

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(5);
        assert_eq!(backoff_delay(base, 1, cap), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 2, cap), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 3, cap), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 4, cap), cap);
        assert_eq!(backoff_delay(base, 200, cap), cap);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let delay = Duration::from_millis(100);
        for _ in 0..20 {
            let jittered = add_jitter(delay);
            assert!(jittered >= delay);
            assert!(jittered <= delay * 2);
        }
    }

    #[test]
    fn test_transport_error_classification() {
        assert!(TransportError::Timeout.is_retryable());
        assert!(TransportError::Network("reset".into()).is_retryable());
        assert!(
            TransportError::Http {
                status: 503,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(!TransportError::InvalidRequest("no key".into()).is_retryable());
        assert!(!TransportError::Aborted("panicked".into()).is_retryable());
    }
}
