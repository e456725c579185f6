//! Cache Module
//!
//! Namespaced expiring cache with negative caching, expired sweeps and
//! quota-driven LRU eviction.

mod engine;
mod eviction;
mod record;
mod stats;
mod usage;


// Re-export public types
pub use engine::{Cache, PruneReport, QuotaOutcome};
pub use eviction::{EvictionCandidate, EvictionPlan};
pub use record::{CacheRecord, LONG_TTL, SHORT_TTL};
pub use stats::CacheStats;
pub use usage::{CacheUsage, Scope};
