//! Usage Accounting Module
//!
//! Byte and item counts over a backing store, scoped to one namespace or the
//! whole store.

use std::sync::Arc;

use crate::error::Result;
use crate::storage::{entry_size, BackingStore};

/// Which keys an accounting scan covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Only keys carrying the namespace prefix
    Namespace,
    /// Every key in the store
    All,
}

// == Cache Usage ==
/// Read-only accounting view over a store.
///
/// Values are sized by their raw stored bytes, so anything in the store can
/// be measured whether or not it parses as a cache record.
pub struct CacheUsage<S> {
    storage: Arc<S>,
    namespace: String,
}

impl<S: BackingStore> CacheUsage<S> {
    pub fn new(storage: Arc<S>, namespace: impl Into<String>) -> Self {
        Self {
            storage,
            namespace: namespace.into(),
        }
    }

    /// Sums `len(key) + len(value)` over every key in `scope`.
    pub async fn usage_in_bytes(&self, scope: Scope) -> Result<u64> {
        let mut usage = 0;
        for key in self.scoped_keys(scope).await? {
            // A key removed between listing and reading contributes nothing.
            if let Some(value) = self.storage.get(&key).await? {
                usage += entry_size(&key, &value);
            }
        }
        Ok(usage)
    }

    /// Number of keys in `scope`.
    pub async fn item_count(&self, scope: Scope) -> Result<usize> {
        Ok(self.scoped_keys(scope).await?.len())
    }

    async fn scoped_keys(&self, scope: Scope) -> Result<Vec<String>> {
        let keys = self.storage.keys().await?;
        Ok(match scope {
            Scope::All => keys,
            Scope::Namespace => keys
                .into_iter()
                .filter(|k| k.starts_with(&self.namespace))
                .collect(),
        })
    }
}
