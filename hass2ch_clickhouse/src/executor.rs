use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Runs a single SQL statement against the analytical store.
///
/// One call is one attempt, retrying is up to the caller.
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    async fn execute(&self, query: &str, body: Option<Bytes>) -> Result<()>;
}
