//
//  repo-migrator
//  api/retry.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! # Retry Policy
//!
//! "Run this again if it failed in a way that might go away." The policy knows
//! nothing about HTTP: the caller decides what counts as transient, and the
//! policy only counts attempts. Inter-attempt delay is kept small on purpose;
//! waiting out rate limits is the job of [`ApiClient`](super::ApiClient).
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use repo_migrator::api::RetryPolicy;
//!
//! # async fn example() -> Result<(), std::io::Error> {
//! let policy = RetryPolicy::new(3, Duration::from_millis(200));
//! let value = policy
//!     .retry_when(
//!         || async { std::fs::read_to_string("/tmp/flaky") },
//!         |e: &std::io::Error| e.kind() == std::io::ErrorKind::Interrupted,
//!     )
//!     .await?;
//! # let _ = value;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};

use super::common::ApiError;

/// HTTP statuses worth repeating a request for.
pub const TRANSIENT_STATUS_CODES: &[u16] = &[408, 429, 500, 502, 503, 504];

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: usize = 5;

/// Default pause between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Retries an operation under a failure predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: usize,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// A policy allowing `max_retries` repeats with a constant `delay`.
    pub fn new(max_retries: usize, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// A policy that repeats immediately.
    pub fn immediate(max_retries: usize) -> Self {
        Self::new(max_retries, Duration::ZERO)
    }

    /// A policy that never repeats.
    pub fn none() -> Self {
        Self::immediate(0)
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Runs `operation`, repeating it while it fails with a transient
    /// [`ApiError`] (see [`ApiError::is_transient`]).
    pub async fn retry<T, F, Fut>(&self, operation: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        self.retry_when(operation, ApiError::is_transient).await
    }

    /// Runs `operation`, repeating it while `is_transient` approves the error.
    ///
    /// Errors the predicate rejects are returned immediately and unchanged.
    /// When the ceiling is reached the last error is returned.
    pub async fn retry_when<T, E, F, Fut, P>(&self, mut operation: F, is_transient: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
        E: std::fmt::Display,
    {
        let attempt = AtomicUsize::new(0);
        let max_attempts = self.max_retries + 1;

        let counted = || {
            attempt.fetch_add(1, Ordering::SeqCst);
            operation()
        };

        counted
            .retry(
                ConstantBuilder::default()
                    .with_delay(self.delay)
                    .with_max_times(self.max_retries),
            )
            .when(is_transient)
            .notify(|err: &E, delay: Duration| {
                tracing::debug!(
                    "Attempt {}/{} failed, retrying in {:?}: {}",
                    attempt.load(Ordering::SeqCst),
                    max_attempts,
                    delay,
                    err
                );
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    fn counter() -> Arc<AtomicU32> {
        Arc::new(AtomicU32::new(0))
    }

    #[tokio::test]
    async fn test_retries_transient_status_until_success() {
        let calls = counter();
        let calls_capture = Arc::clone(&calls);

        let result = RetryPolicy::immediate(5)
            .retry(|| {
                let calls = Arc::clone(&calls_capture);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(ApiError::from_status(503, "unavailable"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_error_propagates_unwrapped() {
        let calls = counter();
        let calls_capture = Arc::clone(&calls);

        let err = RetryPolicy::immediate(5)
            .retry(|| {
                let calls = Arc::clone(&calls_capture);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(ApiError::from_status(404, "Not Found"))
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Http { status: 404, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_at_ceiling_with_last_error() {
        let calls = counter();
        let calls_capture = Arc::clone(&calls);

        let err = RetryPolicy::immediate(2)
            .retry(|| {
                let calls = Arc::clone(&calls_capture);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(ApiError::from_status(502, &format!("attempt {n}")))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.to_string(), "HTTP 502: attempt 2");
    }

    #[tokio::test]
    async fn test_unauthorized_is_never_retried() {
        let calls = counter();
        let calls_capture = Arc::clone(&calls);

        let err = RetryPolicy::immediate(5)
            .retry(|| {
                let calls = Arc::clone(&calls_capture);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(ApiError::from_status(401, "Bad credentials"))
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::AuthFailed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_when_custom_predicate_on_plain_errors() {
        let calls = counter();
        let calls_capture = Arc::clone(&calls);

        let result = RetryPolicy::immediate(3)
            .retry_when(
                || {
                    let calls = Arc::clone(&calls_capture);
                    async move {
                        match calls.fetch_add(1, Ordering::SeqCst) {
                            0 => Err("busy".to_string()),
                            _ => Ok(7),
                        }
                    }
                },
                |e: &String| e == "busy",
            )
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_policy_waits_between_attempts() {
        let calls = counter();
        let calls_capture = Arc::clone(&calls);
        let started = tokio::time::Instant::now();

        let result = RetryPolicy::default()
            .retry(|| {
                let calls = Arc::clone(&calls_capture);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ApiError::from_status(500, "boom"))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert!(started.elapsed() >= DEFAULT_RETRY_DELAY);
    }
}
