//! Error types for cache operations.

use std::sync::Arc;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific errors.
///
/// Infrastructure failures (`Unavailable`, `Corrupted`, `Timeout`) are
/// recovered inside the cache and never escape `get`/`set`/`invalidate`.
/// Only [`MultiLayerCache::get_or_load`](crate::MultiLayerCache::get_or_load)
/// can fail, and only with the caller's own serialization problem or the
/// loader's own error.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Redis-specific error
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// A stored entry failed to decode (bad frame tag, gzip failure,
    /// invalid JSON). Treated as a miss; the entry is proactively deleted.
    #[error("Corrupted cache entry: {0}")]
    Corrupted(String),

    /// The distributed tier could not be reached.
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation timeout
    #[error("Operation timeout")]
    Timeout,

    /// The caller-supplied loader failed during a read-through load.
    ///
    /// The original error is shared because every caller awaiting the same
    /// in-flight load observes the same failure.
    #[error("Loader failed: {0}")]
    Loader(Arc<CacheError>),
}

impl CacheError {
    /// True for errors the cache recovers from internally.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            CacheError::Corrupted(_) | CacheError::Unavailable(_) | CacheError::Timeout
        )
    }
}
