//! Quota Cache - A namespaced, quota-bounded expiring cache
//!
//! Sits in front of slow or rate-limited lookups, persisting results into a
//! small shared key/value store. Remembers negative results, sweeps expired
//! records and evicts least-recently-used records when the store fills up.

pub mod cache;
pub mod config;
pub mod error;
pub mod storage;
pub mod tasks;

pub use cache::{
    Cache, CacheRecord, CacheStats, CacheUsage, PruneReport, QuotaOutcome, Scope,
};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use storage::{BackingStore, FileStore, MemoryStore};
pub use tasks::spawn_maintenance_task;
