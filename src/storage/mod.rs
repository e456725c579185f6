//! Storage Module
//!
//! The asynchronous key/value contract the cache is built on, plus two
//! concrete stores.

mod file;
mod memory;

use async_trait::async_trait;

use crate::error::Result;

pub use file::FileStore;
pub use memory::MemoryStore;

// == Backing Store ==
/// Asynchronous string-keyed map the cache persists records into.
///
/// Values are serialized strings; the cache does its own (de)serialization.
/// Implementations must report an exhausted quota on `set` as
/// [`crate::CacheError::CapacityExceeded`] and nothing else as that variant.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Returns the raw value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Removes `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Lists every key currently in the store.
    async fn keys(&self) -> Result<Vec<String>>;
}

/// Byte footprint of one stored pair, the unit quotas are measured in.
pub(crate) fn entry_size(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}
