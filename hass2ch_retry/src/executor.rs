use std::{future::Future, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::{RetryConfig, RetryError};

/// Attempt-level hooks of the retry executor.
///
/// Attempts are zero based: attempt 0 is the first call, attempt 1 the first retry.
pub trait RetryObserver<E>: Send + Sync {
    /// Called before waiting for the given retry.
    fn on_retry_attempt(&self, _attempt: u32, _error: &E, _next_backoff: Duration) {}

    /// Called when a retry (attempt > 0) succeeds.
    fn on_retry_success(&self, _attempt: u32) {}

    /// Called when the last allowed attempt fails.
    fn on_retry_failure(&self, _attempt: u32, _error: &E) {}
}

/// Observer that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl<E> RetryObserver<E> for NoopObserver {}

/// Runs `operation` until it succeeds, fails with a non-retryable error or
/// runs out of retries.
pub async fn retry<T, E, F, Fut>(
    ct: &CancellationToken,
    config: &RetryConfig,
    is_retryable: impl Fn(&E) -> bool,
    operation: F,
) -> Result<T, RetryError<E>>
where
    E: std::error::Error + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_with_observer(ct, config, is_retryable, &NoopObserver, operation).await
}

/// Same as [`retry`], reporting every attempt to `observer`.
pub async fn retry_with_observer<T, E, F, Fut>(
    ct: &CancellationToken,
    config: &RetryConfig,
    is_retryable: impl Fn(&E) -> bool,
    observer: &dyn RetryObserver<E>,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    E: std::error::Error + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;

    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    observer.on_retry_success(attempt);
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if !is_retryable(&error) {
            return Err(RetryError::NonRetryable { source: error });
        }

        if attempt >= config.max_retries {
            observer.on_retry_failure(attempt, &error);
            return Err(RetryError::Exhausted {
                retries: config.max_retries,
                source: error,
            });
        }

        let delay = config.next_delay(attempt);
        attempt += 1;
        observer.on_retry_attempt(attempt, &error, delay);
        trace!(attempt, delay = ?delay, "waiting before next attempt");

        tokio::select! {
            _ = ct.cancelled() => {
                return Err(RetryError::Cancelled {
                    attempts: attempt,
                    source: error,
                });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
