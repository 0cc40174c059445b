use std::time::Duration;

/// Error type for this crate.
#[derive(Debug, thiserror::Error)]
pub enum TollgateError {
    /// Redis error.
    ///
    /// The admission decision is unknown: the script may or may not have run.
    #[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
    #[error("redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    /// The store call did not complete before the caller's deadline.
    ///
    /// Like [`TollgateError::RedisError`], the admission decision is unknown.
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid key prefix.
    #[error("invalid key prefix: {0}")]
    InvalidKeyPrefix(String),

    /// Invalid connection count for a Redis bucket store.
    #[error("invalid connection count: {0}")]
    InvalidConnectionCount(String),

    /// The store returned a reply this crate does not understand.
    #[error("unexpected script result: {0}")]
    UnexpectedScriptResult(String),
}
