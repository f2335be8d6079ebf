use snafu::Snafu;

/// Error returned by the retry executor.
///
/// Every variant carries the last error returned by the operation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RetryError<E: std::error::Error + 'static> {
    /// The operation failed with an error that must not be retried.
    #[snafu(display("non-retryable error"))]
    NonRetryable { source: E },
    /// The operation kept failing with retryable errors.
    #[snafu(display("operation failed after {retries} retries"))]
    Exhausted { retries: u32, source: E },
    /// Cancelled while waiting for the next attempt.
    #[snafu(display("cancelled during retry backoff after {attempts} attempts"))]
    Cancelled { attempts: u32, source: E },
}

impl<E: std::error::Error + 'static> RetryError<E> {
    /// The last error returned by the operation.
    pub fn last_error(&self) -> &E {
        match self {
            Self::NonRetryable { source } => source,
            Self::Exhausted { source, .. } => source,
            Self::Cancelled { source, .. } => source,
        }
    }

    pub fn into_last_error(self) -> E {
        match self {
            Self::NonRetryable { source } => source,
            Self::Exhausted { source, .. } => source,
            Self::Cancelled { source, .. } => source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
