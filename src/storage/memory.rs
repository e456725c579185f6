//! In-Memory Store
//!
//! Ordered in-memory map with an optional byte quota, behaving like a small
//! browser-style storage area.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{entry_size, BackingStore};
use crate::error::{CacheError, Result};

// == Memory Store ==
/// In-memory [`BackingStore`] with deterministic key order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
    /// Maximum total of key + value bytes, None = unbounded
    capacity_bytes: Option<u64>,
}

impl MemoryStore {
    /// Creates an unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store whose writes fail once `capacity_bytes` would be exceeded.
    pub fn with_capacity_bytes(capacity_bytes: u64) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            capacity_bytes: Some(capacity_bytes),
        }
    }

    /// Total key + value bytes currently stored.
    pub async fn used_bytes(&self) -> u64 {
        let entries = self.entries.read().await;
        entries.iter().map(|(k, v)| entry_size(k, v)).sum()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut entries = self.entries.write().await;

        if let Some(capacity) = self.capacity_bytes {
            check_capacity(&entries, key, &value, capacity)?;
        }

        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}

/// Fails with `CapacityExceeded` if writing `key = value` would push the
/// map past `capacity`. An overwrite is measured net of the replaced value.
pub(super) fn check_capacity(
    entries: &BTreeMap<String, String>,
    key: &str,
    value: &str,
    capacity: u64,
) -> Result<()> {
    let used: u64 = entries.iter().map(|(k, v)| entry_size(k, v)).sum();
    let replaced = entries.get(key).map(|old| entry_size(key, old)).unwrap_or(0);
    let needed = used - replaced + entry_size(key, value);

    if needed > capacity {
        return Err(CacheError::CapacityExceeded(format!(
            "writing '{}' needs {} bytes, capacity is {}",
            key, needed, capacity
        )));
    }
    Ok(())
}
