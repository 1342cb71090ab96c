//! Timeout wrapper for sandbox calls.

use crate::ExecutorError;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Wrap a sandbox call with the node timeout; expiry is a `SandboxTimeout`.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, ExecutorError>
where
    F: Future<Output = Result<T, ExecutorError>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ExecutorError::SandboxTimeout(limit.as_millis() as u64)),
    }
}
