//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache and its backing stores.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The backing store has no room left for the write
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Any other backing store failure
    #[error("Store failure: {0}")]
    StoreFailure(String),

    /// Stored value is not a cache record
    #[error("Malformed record at '{key}': {reason}")]
    MalformedRecord { key: String, reason: String },

    /// Payload could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid caller input
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration rejected by validation
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Upstream lookup failed in a read-through fetch
    #[error("Upstream error: {0}")]
    Upstream(#[source] anyhow::Error),
}

impl CacheError {
    /// Returns true if this error signals an exhausted store quota.
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, CacheError::CapacityExceeded(_))
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
