//! Cache error types
//!
//! These never leave the crate's request-facing API: the adapter and the
//! orchestrator turn every variant into a neutral result plus a log line.

use std::time::Duration;

use redis::RedisError;

/// Cache-related errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("Remote cache unavailable")]
    Unavailable,

    #[error("Invalid key pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

impl CacheError {
    /// Whether the error means the transport itself is unhealthy.
    ///
    /// Serialization and pattern errors are local and say nothing about the
    /// connection.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            CacheError::Redis(_) | CacheError::Timeout { .. } | CacheError::Unavailable
        )
    }
}
