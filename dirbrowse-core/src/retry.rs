//! One-shot pool rebuild and retry for transient connection faults.
//!
//! [`with_retry`] runs an operation against the current pool for a server.
//! If it fails with a retryable fault (see
//! [`crate::error::RetryableErrorClass`]), the pool is discarded, a fresh
//! one is obtained, and the operation runs exactly once more. The second
//! failure, if any, is the one the caller sees. Terminal errors propagate
//! on the first attempt and leave the pool alone.
//!
//! Only the pool that failed is discarded. When concurrent callers fail on
//! the same pool, whichever discards first replaces it and the others reuse
//! the replacement instead of tearing it down.

use crate::config::ServerConfig;
use crate::Result;
use async_trait::async_trait;
use std::future::Future;

/// Source of pools for the retry executor.
#[async_trait]
pub trait PoolProvider: Send + Sync {
    /// Handle passed to the operation.
    type Handle: Clone + Send + Sync;

    /// Returns a live pool for the server, building one if needed.
    async fn pool(&self, config: &ServerConfig) -> Result<Self::Handle>;

    /// Closes and forgets `failed` along with any state tied to its
    /// connections, unless the server's pool has already been replaced.
    async fn discard(&self, server: &str, failed: &Self::Handle);
}

/// Runs `operation` with at most one pool rebuild.
///
/// # Errors
/// Returns the error from obtaining a pool, the first terminal error, or
/// the error from the retried attempt
pub async fn with_retry<P, F, Fut, T>(provider: &P, config: &ServerConfig, operation: F) -> Result<T>
where
    P: PoolProvider + ?Sized,
    F: Fn(P::Handle) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let pool = provider.pool(config).await?;
    let error = match operation(pool.clone()).await {
        Ok(value) => return Ok(value),
        Err(error) => error,
    };

    let Some(class) = error.retryable_class() else {
        return Err(error);
    };

    tracing::warn!(
        server = %config.name,
        class = ?class,
        error = %error,
        "Retryable directory failure; rebuilding connection pool"
    );
    provider.discard(&config.name, &pool).await;

    let pool = provider.pool(config).await?;
    operation(pool).await.inspect_err(|retry_error| {
        tracing::warn!(server = %config.name, error = %retry_error, "Retried operation failed");
    })
}
