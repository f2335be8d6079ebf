//! Bounded exponential backoff and a retry executor.
//!
//! The backoff policy is a pure function of the configuration, the attempt
//! number and a uniform random draw. The executor runs a fallible async
//! operation, retrying the errors the caller classifies as transient.
pub mod backoff;
pub mod error;
pub mod executor;

pub use backoff::{RetryConfig, backoff_delay};
pub use error::RetryError;
pub use executor::{NoopObserver, RetryObserver, retry, retry_with_observer};
