//! HTTP client for ClickHouse.
//!
//! [`ClickHouseClient`] runs one statement per request, optionally with a
//! `JSONEachRow` body. Retries are left to the caller, who can tell
//! transient failures apart with [`ClickHouseError::is_retryable`].
mod client;
pub mod error;
mod executor;
mod row;

pub use self::client::{ClickHouseClient, ClickHouseOptions};
pub use self::error::{ClickHouseError, Result};
pub use self::executor::StatementExecutor;
pub use self::row::encode_json_each_row;
