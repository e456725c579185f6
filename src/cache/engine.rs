//! Cache Engine Module
//!
//! Expiring, namespaced cache over a [`BackingStore`]: lookups with expiry,
//! writes with negative caching, expired sweeps and quota enforcement.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::eviction::{EvictionCandidate, EvictionPlan};
use crate::cache::stats::StatsCounters;
use crate::cache::{CacheRecord, CacheStats, CacheUsage, Scope};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::storage::{entry_size, BackingStore};

// == Prune Report ==
/// Outcome of an expired-record sweep.
#[derive(Debug, Default)]
pub struct PruneReport {
    /// Namespace keys examined
    pub scanned: usize,
    /// Expired records removed
    pub removed: usize,
    /// Keys that could not be read or removed, with the error
    pub failures: Vec<(String, CacheError)>,
}

// == Quota Outcome ==
/// What a quota enforcement pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaOutcome {
    /// Another pass was in flight; this call did nothing
    AlreadyRunning,
    /// Usage was at or below the max threshold
    WithinQuota { usage_bytes: u64 },
    /// Pruning expired records brought usage to the target
    Pruned { removed: usize, usage_bytes: u64 },
    /// Least-recently-used records were evicted after pruning
    Evicted {
        pruned: usize,
        evicted: usize,
        bytes_to_recover: u64,
        recovered_bytes: u64,
    },
}

/// Clears the enforcement flag when a pass ends, however it ends.
struct EnforcementGuard<'a>(&'a AtomicBool);

impl<'a> EnforcementGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for EnforcementGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// == Cache ==
/// Namespaced, quota-bounded expiring cache.
///
/// All operations take `&self`; share the cache through an `Arc`. Only
/// [`Cache::enforce_quota`] is mutually exclusive with itself; everything
/// else may interleave, with last-write-wins on a single key.
pub struct Cache<S> {
    storage: Arc<S>,
    config: CacheConfig,
    usage: CacheUsage<S>,
    enforcing: AtomicBool,
    stats: StatsCounters,
}

impl<S: BackingStore> Cache<S> {
    // == Constructor ==
    /// Creates a cache over `storage` using `config` as given.
    pub fn new(storage: Arc<S>, config: CacheConfig) -> Self {
        let usage = CacheUsage::new(Arc::clone(&storage), config.namespace.clone());
        Self {
            storage,
            config,
            usage,
            enforcing: AtomicBool::new(false),
            stats: StatsCounters::default(),
        }
    }

    /// Like [`Cache::new`], rejecting an invalid configuration.
    pub fn try_new(storage: Arc<S>, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(storage, config))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Accounting view over the same store and namespace.
    pub fn usage(&self) -> &CacheUsage<S> {
        &self.usage
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    // == Find ==
    /// Looks up `id`, returning its record if present and not expired.
    ///
    /// An expired record is removed on the way out. A hit refreshes the
    /// record's access time in the store. Both writes are best-effort.
    pub async fn find<T>(&self, id: &str) -> Result<Option<CacheRecord<T>>>
    where
        T: Serialize + DeserializeOwned,
    {
        let key = self.key_for(id)?;

        let Some(raw) = self.storage.get(&key).await? else {
            self.stats.record_miss();
            return Ok(None);
        };

        let mut record = match CacheRecord::<T>::decode(&key, &raw) {
            Ok(record) => record,
            Err(e) => {
                debug!("Ignoring foreign value: {}", e);
                self.stats.record_miss();
                return Ok(None);
            }
        };

        // Expired records read as absent and are dropped
        let now = Utc::now();
        if record.is_expired_at(now) {
            match self.storage.remove(&key).await {
                Ok(()) => self.stats.record_expirations(1),
                Err(e) => warn!("Failed to remove expired '{}': {}", key, e),
            }
            self.stats.record_miss();
            return Ok(None);
        }

        // Refresh access time; a failed write-back still counts as a hit
        record.touch(now);
        match record.encode() {
            Ok(encoded) => {
                if let Err(e) = self.storage.set(&key, encoded).await {
                    warn!("Failed to refresh access time of '{}': {}", key, e);
                }
            }
            Err(e) => warn!("Failed to encode '{}': {}", key, e),
        }

        debug!(
            "Hit '{}' ({}s to live)",
            key,
            record.ttl_remaining().num_seconds()
        );
        self.stats.record_hit(record.is_negative());
        Ok(Some(record))
    }

    // == Store ==
    /// Caches `data` under `id`; `None` records a negative result.
    ///
    /// If the store is out of capacity, one quota pass runs and the write is
    /// retried once. If the retry fails too, the original capacity error is
    /// returned.
    pub async fn store<T: Serialize>(&self, id: &str, data: Option<T>) -> Result<()> {
        let key = self.key_for(id)?;
        let encoded = CacheRecord::new(data, Utc::now()).encode()?;

        match self.storage.set(&key, encoded.clone()).await {
            Err(original) if original.is_capacity_exceeded() => {
                warn!("Write of '{}' hit the store quota, enforcing: {}", key, original);

                // Make room, then retry exactly once
                if let Err(e) = self.enforce_quota().await {
                    warn!("Quota enforcement failed: {}", e);
                }
                if let Err(e) = self.storage.set(&key, encoded).await {
                    warn!("Retry of '{}' failed: {}", key, e);
                    return Err(original);
                }
                Ok(())
            }
            result => result,
        }
    }

    // == Find Or Fetch ==
    /// Returns the cached value for `id`, or fetches and caches it.
    ///
    /// A fetched `None` is cached as a negative result, so the fetcher is
    /// not called again until that entry expires. Fetch errors are not
    /// cached. Failing to cache a fetched value is logged, not returned.
    pub async fn find_or_fetch<T, F, Fut>(&self, id: &str, fetch: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<T>>>,
    {
        if let Some(record) = self.find::<T>(id).await? {
            return Ok(record.data);
        }

        let data = fetch().await.map_err(CacheError::Upstream)?;
        if let Err(e) = self.store(id, data.as_ref()).await {
            warn!("Failed to cache fetched value for '{}': {}", id, e);
        }
        Ok(data)
    }

    // == Prune ==
    /// Removes every expired record in the namespace.
    ///
    /// Values that are not cache records are left alone. Per-key failures
    /// are collected in the report and do not stop the sweep.
    pub async fn prune(&self) -> Result<PruneReport> {
        let keys = self.namespace_keys().await?;
        let now = Utc::now();
        let mut report = PruneReport::default();

        for key in keys {
            report.scanned += 1;

            let raw = match self.storage.get(&key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    report.failures.push((key, e));
                    continue;
                }
            };

            // Foreign values are not ours to prune
            let Ok(record) = CacheRecord::<IgnoredAny>::decode(&key, &raw) else {
                continue;
            };
            if !record.is_expired_at(now) {
                continue;
            }

            match self.storage.remove(&key).await {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    warn!("Failed to prune '{}': {}", key, e);
                    report.failures.push((key, e));
                }
            }
        }

        self.stats.record_expirations(report.removed as u64);
        if report.removed > 0 {
            info!(
                "Prune: removed {} of {} records in '{}'",
                report.removed, report.scanned, self.config.namespace
            );
        } else {
            debug!("Prune: no expired records in '{}'", self.config.namespace);
        }
        Ok(report)
    }

    // == Enforce Quota ==
    /// Brings namespace usage back under the configured quota.
    ///
    /// Does nothing while usage is at or below `quota_max_bytes`. Otherwise
    /// prunes expired records, and if usage is still above
    /// `quota_target_bytes`, evicts least-recently-accessed records until the
    /// excess is recovered. A call made while another pass is running returns
    /// [`QuotaOutcome::AlreadyRunning`] without waiting.
    pub async fn enforce_quota(&self) -> Result<QuotaOutcome> {
        let Some(_guard) = EnforcementGuard::try_acquire(&self.enforcing) else {
            debug!("Quota enforcement already running, skipping");
            return Ok(QuotaOutcome::AlreadyRunning);
        };

        // Nothing to do at or below max
        let usage = self.usage.usage_in_bytes(Scope::Namespace).await?;
        if usage <= self.config.quota_max_bytes {
            debug!(
                "Usage {} within quota {} for '{}'",
                usage, self.config.quota_max_bytes, self.config.namespace
            );
            return Ok(QuotaOutcome::WithinQuota { usage_bytes: usage });
        }

        info!(
            "Usage {} exceeds quota {} for '{}', pruning",
            usage, self.config.quota_max_bytes, self.config.namespace
        );
        let pruned = self.prune().await?.removed;

        // Pruning alone may be enough
        let usage = self.usage.usage_in_bytes(Scope::Namespace).await?;
        if usage <= self.config.quota_target_bytes {
            return Ok(QuotaOutcome::Pruned {
                removed: pruned,
                usage_bytes: usage,
            });
        }

        let bytes_to_recover = usage - self.config.quota_target_bytes;
        let plan = EvictionPlan::new(self.eviction_candidates().await?);
        debug!(
            "Evicting up to {} bytes from {} candidates ({} bytes)",
            bytes_to_recover,
            plan.len(),
            plan.total_bytes()
        );

        // Evict oldest first; failed removals recover nothing
        let mut evicted = 0;
        let mut recovered_bytes = 0;
        for candidate in plan {
            if recovered_bytes >= bytes_to_recover {
                break;
            }
            match self.storage.remove(&candidate.key).await {
                Ok(()) => {
                    evicted += 1;
                    recovered_bytes += candidate.size_bytes;
                }
                Err(e) => warn!("Failed to evict '{}': {}", candidate.key, e),
            }
        }

        self.stats.record_evictions(evicted as u64);
        info!(
            "Evicted {} records ({} of {} bytes) from '{}'",
            evicted, recovered_bytes, bytes_to_recover, self.config.namespace
        );

        Ok(QuotaOutcome::Evicted {
            pruned,
            evicted,
            bytes_to_recover,
            recovered_bytes,
        })
    }

    // == Helpers ==
    fn key_for(&self, id: &str) -> Result<String> {
        if id.is_empty() {
            return Err(CacheError::InvalidRequest(
                "Cache id must not be empty".to_string(),
            ));
        }
        Ok(format!("{}{}", self.config.namespace, id))
    }

    async fn namespace_keys(&self) -> Result<Vec<String>> {
        let keys = self.storage.keys().await?;
        Ok(keys
            .into_iter()
            .filter(|k| k.starts_with(&self.config.namespace))
            .collect())
    }

    /// Loads every parseable record in the namespace with its size.
    async fn eviction_candidates(&self) -> Result<Vec<EvictionCandidate>> {
        let mut candidates = Vec::new();

        for key in self.namespace_keys().await? {
            let raw = match self.storage.get(&key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Skipping unreadable '{}': {}", key, e);
                    continue;
                }
            };
            // Foreign values are never evicted
            let Ok(record) = CacheRecord::<IgnoredAny>::decode(&key, &raw) else {
                continue;
            };

            candidates.push(EvictionCandidate {
                size_bytes: entry_size(&key, &raw),
                last_accessed_at: record.last_accessed_at,
                key,
            });
        }

        Ok(candidates)
    }
}
