//! Retry mechanism with exponential backoff and jitter
//!
//! Applied by every operation that performs a single idempotent network call.
//! Batched calls are deliberately not wrapped here: a batch already reports
//! per-item outcomes and re-running it would repeat finished sub-operations.

use std::time::{Duration, Instant};

use crate::config::RetryConfig;
use crate::error::{Error, Result};

/// Retry a fallible async operation with exponential backoff
///
/// Gives up when `is_retryable` rejects the error, when `max_attempts` is
/// reached, or when the next sleep would cross `max_elapsed_ms`. The last
/// error is returned in every case.
///
/// # Example
/// ```ignore
/// let meta = retry_with_backoff(
///     &config,
///     || async { client.get_object(&path).await },
///     is_retryable_error,
/// ).await?;
/// ```
pub async fn retry_with_backoff<T, F, Fut, R>(
    config: &RetryConfig,
    mut operation: F,
    is_retryable: R,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    R: Fn(&Error) -> bool,
{
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt >= config.max_attempts || !is_retryable(&e) {
                    return Err(e);
                }

                let backoff = calculate_backoff(config, attempt);
                if let Some(budget_ms) = config.max_elapsed_ms
                    && started.elapsed().saturating_add(backoff) > Duration::from_millis(budget_ms)
                {
                    tracing::debug!(attempt, error = %e, "Retry time budget exhausted");
                    return Err(e);
                }

                tracing::debug!(
                    attempt = attempt,
                    backoff_ms = backoff.as_millis(),
                    error = %e,
                    "Retrying after transient error"
                );

                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Calculate backoff duration with jitter
fn calculate_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    // Exponential backoff: initial * 2^(attempt-1)
    let base_ms = config
        .initial_backoff_ms
        .saturating_mul(1u64 << (attempt - 1).min(10));
    let capped_ms = base_ms.min(config.max_backoff_ms);

    let jitter_ms = rand_jitter(capped_ms);
    Duration::from_millis(capped_ms.saturating_add(jitter_ms))
}

/// Pseudo-random jitter in `0..max` without an RNG dependency
fn rand_jitter(max: u64) -> u64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    nanos % max.max(1)
}

/// Retry filter for server errors (5xx) and timeouts
pub fn is_retryable_error(error: &Error) -> bool {
    matches!(error, Error::Transient { .. })
}

/// Retry configuration builder
#[derive(Debug, Clone)]
pub struct RetryBuilder {
    config: RetryConfig,
}

impl RetryBuilder {
    pub fn new() -> Self {
        Self {
            config: RetryConfig::default(),
        }
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn initial_backoff_ms(mut self, ms: u64) -> Self {
        self.config.initial_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.config.max_backoff_ms = ms;
        self
    }

    pub fn max_elapsed_ms(mut self, ms: Option<u64>) -> Self {
        self.config.max_elapsed_ms = ms;
        self
    }

    pub fn build(self) -> RetryConfig {
        self.config
    }
}

impl Default for RetryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryBuilder::new()
            .max_attempts(3)
            .initial_backoff_ms(1)
            .max_backoff_ms(10)
            .max_elapsed_ms(None)
            .build()
    }

    #[test]
    fn test_calculate_backoff() {
        let config = RetryBuilder::new()
            .initial_backoff_ms(100)
            .max_backoff_ms(10000)
            .build();

        let b1 = calculate_backoff(&config, 1);
        assert!(b1.as_millis() >= 100 && b1.as_millis() < 200);

        let b2 = calculate_backoff(&config, 2);
        assert!(b2.as_millis() >= 200 && b2.as_millis() < 400);

        let b3 = calculate_backoff(&config, 3);
        assert!(b3.as_millis() >= 400 && b3.as_millis() < 800);
    }

    #[test]
    fn test_backoff_saturates_on_huge_settings() {
        let config = RetryBuilder::new()
            .initial_backoff_ms(u64::MAX / 3)
            .max_backoff_ms(u64::MAX)
            .build();

        let b = calculate_backoff(&config, 4);
        assert_eq!(b, Duration::from_millis(u64::MAX));
    }

    #[tokio::test]
    async fn test_huge_backoff_respects_time_budget() {
        let config = RetryBuilder::new()
            .max_attempts(4)
            .initial_backoff_ms(u64::MAX / 3)
            .max_backoff_ms(u64::MAX)
            .max_elapsed_ms(Some(1000))
            .build();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> = retry_with_backoff(
            &config,
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::transient("busy")) }
            },
            is_retryable_error,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_cap() {
        let config = RetryBuilder::new()
            .initial_backoff_ms(1000)
            .max_backoff_ms(5000)
            .build();

        let b = calculate_backoff(&config, 10);
        assert!(b.as_millis() <= 10000); // max + jitter
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(is_retryable_error(&Error::from_status(503, "unavailable")));
        assert!(is_retryable_error(&Error::from_status(408, "timeout")));
        assert!(is_retryable_error(&Error::transient("connection reset")));

        assert!(!is_retryable_error(&Error::from_status(403, "denied")));
        assert!(!is_retryable_error(&Error::NotFound("gs://b/o".to_string())));
        assert!(!is_retryable_error(&Error::InvalidPath("x".to_string())));
    }

    #[test]
    fn test_retry_builder() {
        let config = RetryBuilder::new()
            .max_attempts(5)
            .initial_backoff_ms(200)
            .max_backoff_ms(20000)
            .max_elapsed_ms(Some(1000))
            .build();

        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.initial_backoff_ms, 200);
        assert_eq!(config.max_backoff_ms, 20000);
        assert_eq!(config.max_elapsed_ms, Some(1000));
    }

    #[tokio::test]
    async fn test_retry_success_first_attempt() {
        let mut calls = 0;

        let result = retry_with_backoff(
            &fast(),
            || {
                calls += 1;
                async { Ok::<_, Error>(42) }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_retry_success_after_failure() {
        let call_count = Arc::new(AtomicU32::new(0));
        let call_count_clone = call_count.clone();

        let result = retry_with_backoff(
            &fast(),
            || {
                let cc = call_count_clone.clone();
                async move {
                    let count = cc.fetch_add(1, Ordering::SeqCst);
                    if count < 2 {
                        Err(Error::from_status(500, "backend"))
                    } else {
                        Ok(42)
                    }
                }
            },
            is_retryable_error,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted_returns_last_error() {
        let mut calls = 0;

        let result: Result<()> = retry_with_backoff(
            &fast(),
            || {
                calls += 1;
                let n = calls;
                async move { Err(Error::transient(format!("failure {n}"))) }
            },
            is_retryable_error,
        )
        .await;

        assert_eq!(result.unwrap_err(), Error::transient("failure 3"));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_retry_non_retryable() {
        let mut calls = 0;

        let result: Result<()> = retry_with_backoff(
            &fast(),
            || {
                calls += 1;
                async { Err(Error::NotFound("not found".to_string())) }
            },
            is_retryable_error,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_retry_time_budget() {
        let config = RetryBuilder::new()
            .max_attempts(100)
            .initial_backoff_ms(50)
            .max_backoff_ms(50)
            .max_elapsed_ms(Some(10))
            .build();
        let mut calls = 0;

        let result: Result<()> = retry_with_backoff(
            &config,
            || {
                calls += 1;
                async { Err(Error::transient("slow")) }
            },
            is_retryable_error,
        )
        .await;

        assert!(result.is_err());
        // the first backoff (>= 50ms) already exceeds the 10ms budget
        assert_eq!(calls, 1);
    }
}
