//! Integration Tests for the Cache
//!
//! Exercises the public API end to end over real and failure-injecting
//! backing stores.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use quota_cache::{
    BackingStore, Cache, CacheConfig, CacheError, CacheRecord, FileStore, MemoryStore,
    QuotaOutcome, Result, Scope,
};
use tempfile::tempdir;

// == Helper Functions ==

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn accessed_at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
}

/// A valid record with a fixed-width payload, so every record built here
/// serializes to the same length.
fn lru_record(minutes: i64) -> CacheRecord<String> {
    CacheRecord {
        data: Some("payload".to_string()),
        expires_at: Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap(),
        last_accessed_at: accessed_at(minutes),
    }
}

/// Seeds A (oldest access) through D (newest access) under `ns:` and
/// returns the byte size of one entry.
async fn seed_lru_records(storage: &MemoryStore) -> u64 {
    let mut unit = 0;
    for (minutes, id) in ["A", "B", "C", "D"].iter().enumerate() {
        let key = format!("ns:{}", id);
        let raw = lru_record(minutes as i64).encode().unwrap();
        unit = (key.len() + raw.len()) as u64;
        storage.set(&key, raw).await.unwrap();
    }
    unit
}

/// Store double that fails selected operations and counts writes.
///
/// `set_script[n]` is the error for the n-th write; writes past the end of
/// the script fall back to `fail_set_with`.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    set_script: Vec<fn() -> CacheError>,
    fail_set_with: Option<fn() -> CacheError>,
    fail_remove: bool,
    fail_keys: bool,
    set_calls: AtomicUsize,
}

fn always_full() -> CacheError {
    CacheError::CapacityExceeded("always full".to_string())
}

fn disk_gone() -> CacheError {
    CacheError::StoreFailure("disk gone".to_string())
}

#[async_trait]
impl BackingStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let call = self.set_calls.fetch_add(1, Ordering::SeqCst);
        match self.set_script.get(call).copied().or(self.fail_set_with) {
            Some(make_error) => Err(make_error()),
            None => self.inner.set(key, value).await,
        }
    }

    async fn remove(&self, key: &str) -> Result<()> {
        if self.fail_remove {
            return Err(CacheError::StoreFailure("remove rejected".to_string()));
        }
        self.inner.remove(key).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        if self.fail_keys {
            return Err(CacheError::StoreFailure("listing rejected".to_string()));
        }
        self.inner.keys().await
    }
}

// == LRU Eviction Tests ==

#[tokio::test]
async fn test_enforce_quota_evicts_least_recently_used() {
    init_tracing();
    let storage = Arc::new(MemoryStore::new());
    let unit = seed_lru_records(&storage).await;

    // Four records of `unit` bytes, max = 3 units, target = 2 units
    let config = CacheConfig::default()
        .with_namespace("ns:")
        .with_quota(3 * unit, 2 * unit);
    let cache = Cache::new(Arc::clone(&storage), config);

    let outcome = cache.enforce_quota().await.unwrap();
    assert_eq!(
        outcome,
        QuotaOutcome::Evicted {
            pruned: 0,
            evicted: 2,
            bytes_to_recover: 2 * unit,
            recovered_bytes: 2 * unit,
        }
    );

    assert_eq!(storage.keys().await.unwrap(), vec!["ns:C", "ns:D"]);
    let usage = cache.usage().usage_in_bytes(Scope::Namespace).await.unwrap();
    assert!(usage <= 2 * unit);
    assert_eq!(cache.stats().evictions, 2);
}

#[tokio::test]
async fn test_enforce_quota_below_max_removes_nothing() {
    let storage = Arc::new(MemoryStore::new());
    let unit = seed_lru_records(&storage).await;

    let config = CacheConfig::default()
        .with_namespace("ns:")
        .with_quota(5 * unit, 2 * unit);
    let cache = Cache::new(Arc::clone(&storage), config);

    let outcome = cache.enforce_quota().await.unwrap();
    assert_eq!(outcome, QuotaOutcome::WithinQuota { usage_bytes: 4 * unit });
    assert_eq!(storage.len().await, 4);
}

#[tokio::test]
async fn test_enforce_quota_at_exact_max_removes_nothing() {
    let storage = Arc::new(MemoryStore::new());
    let unit = seed_lru_records(&storage).await;

    let config = CacheConfig::default()
        .with_namespace("ns:")
        .with_quota(4 * unit, 2 * unit);
    let cache = Cache::new(Arc::clone(&storage), config);

    let outcome = cache.enforce_quota().await.unwrap();
    assert_eq!(outcome, QuotaOutcome::WithinQuota { usage_bytes: 4 * unit });
    assert_eq!(storage.len().await, 4);
    assert_eq!(cache.stats().evictions, 0);
}

#[tokio::test]
async fn test_find_protects_record_from_eviction() {
    let storage = Arc::new(MemoryStore::new());
    let unit = seed_lru_records(&storage).await;

    let config = CacheConfig::default()
        .with_namespace("ns:")
        .with_quota(3 * unit, 2 * unit);
    let cache = Cache::new(Arc::clone(&storage), config);

    // Touching A makes it the most recently used record
    cache.find::<String>("A").await.unwrap().unwrap();
    cache.enforce_quota().await.unwrap();

    let remaining = storage.keys().await.unwrap();
    assert!(remaining.contains(&"ns:A".to_string()));
    assert!(!remaining.contains(&"ns:B".to_string()));
    assert!(!remaining.contains(&"ns:C".to_string()));
}

#[tokio::test]
async fn test_enforce_quota_leaves_other_namespaces_alone() {
    let storage = Arc::new(MemoryStore::new());
    let unit = seed_lru_records(&storage).await;
    storage
        .set("other:old", lru_record(-100).encode().unwrap())
        .await
        .unwrap();

    let config = CacheConfig::default()
        .with_namespace("ns:")
        .with_quota(3 * unit, 2 * unit);
    let cache = Cache::new(Arc::clone(&storage), config);
    cache.enforce_quota().await.unwrap();

    assert!(storage.get("other:old").await.unwrap().is_some());
    assert_eq!(cache.usage().item_count(Scope::Namespace).await.unwrap(), 2);
    assert_eq!(cache.usage().item_count(Scope::All).await.unwrap(), 3);
}

// == Store Retry Tests ==

#[tokio::test]
async fn test_store_recovers_from_capacity_exceeded() {
    init_tracing();
    let storage = Arc::new(MemoryStore::new());
    let unit = seed_lru_records(&storage).await;

    // Physical capacity of exactly four records; the fifth write must evict
    let bounded = Arc::new(MemoryStore::with_capacity_bytes(4 * unit));
    for key in storage.keys().await.unwrap() {
        let raw = storage.get(&key).await.unwrap().unwrap();
        bounded.set(&key, raw).await.unwrap();
    }

    let config = CacheConfig::default()
        .with_namespace("ns:")
        .with_quota(3 * unit, 2 * unit);
    let cache = Cache::new(Arc::clone(&bounded), config);

    cache.store("E", Some("payload")).await.unwrap();

    let keys = bounded.keys().await.unwrap();
    assert!(keys.contains(&"ns:E".to_string()));
    assert!(!keys.contains(&"ns:A".to_string()));
    assert!(!keys.contains(&"ns:B".to_string()));
}

#[tokio::test]
async fn test_store_propagates_after_single_retry() {
    let storage = Arc::new(FlakyStore {
        fail_set_with: Some(always_full as fn() -> CacheError),
        ..FlakyStore::default()
    });
    let cache = Cache::new(Arc::clone(&storage), CacheConfig::for_app("app"));

    let result = cache.store("id", Some("data")).await;

    assert!(matches!(result, Err(CacheError::CapacityExceeded(_))));
    assert_eq!(storage.set_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_store_returns_capacity_error_when_retry_fails_differently() {
    init_tracing();
    let storage = Arc::new(FlakyStore {
        set_script: vec![always_full as fn() -> CacheError, disk_gone],
        ..FlakyStore::default()
    });
    let cache = Cache::new(Arc::clone(&storage), CacheConfig::for_app("app"));

    let result = cache.store("id", Some("data")).await;

    match result {
        Err(CacheError::CapacityExceeded(msg)) => assert_eq!(msg, "always full"),
        other => panic!("expected the first capacity error, got {:?}", other),
    }
    assert_eq!(storage.set_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_store_retries_when_enforcement_fails() {
    init_tracing();
    let storage = Arc::new(FlakyStore {
        set_script: vec![always_full as fn() -> CacheError],
        fail_keys: true,
        ..FlakyStore::default()
    });
    let cache = Cache::new(Arc::clone(&storage), CacheConfig::for_app("app"));

    cache.store("id", Some("data")).await.unwrap();

    assert_eq!(storage.set_calls.load(Ordering::SeqCst), 2);
    assert!(storage.inner.get("app:id").await.unwrap().is_some());
}

#[tokio::test]
async fn test_store_does_not_retry_other_failures() {
    let storage = Arc::new(FlakyStore {
        fail_set_with: Some(disk_gone as fn() -> CacheError),
        ..FlakyStore::default()
    });
    let cache = Cache::new(Arc::clone(&storage), CacheConfig::for_app("app"));

    let result = cache.store("id", Some("data")).await;

    assert!(matches!(result, Err(CacheError::StoreFailure(_))));
    assert_eq!(storage.set_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_oversized_record_fails_after_eviction() {
    let storage = Arc::new(MemoryStore::with_capacity_bytes(64));
    let cache = Cache::new(
        Arc::clone(&storage),
        CacheConfig::for_app("app").with_quota(64, 32),
    );

    let result = cache.store("huge", Some("x".repeat(1_000))).await;
    assert!(result.unwrap_err().is_capacity_exceeded());
    assert!(storage.is_empty().await);
}

// == Best-Effort Failure Tests ==

#[tokio::test]
async fn test_find_returns_hit_when_access_write_back_fails() {
    init_tracing();
    let storage = Arc::new(FlakyStore {
        fail_set_with: Some(disk_gone as fn() -> CacheError),
        ..FlakyStore::default()
    });
    let seeded = lru_record(0);
    storage
        .inner
        .set("app:hit", seeded.encode().unwrap())
        .await
        .unwrap();
    let cache = Cache::new(Arc::clone(&storage), CacheConfig::for_app("app"));

    let record = cache.find::<String>("hit").await.unwrap().unwrap();

    assert_eq!(record.data.as_deref(), Some("payload"));
    assert_eq!(record.expires_at, seeded.expires_at);
    assert!(record.last_accessed_at > seeded.last_accessed_at);
    assert_eq!(storage.set_calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().hits, 1);

    // The stored copy keeps its old access time
    let raw = storage.inner.get("app:hit").await.unwrap().unwrap();
    let stored: CacheRecord<String> = CacheRecord::decode("app:hit", &raw).unwrap();
    assert_eq!(stored.last_accessed_at, seeded.last_accessed_at);
}

#[tokio::test]
async fn test_find_swallows_removal_failure_on_expiry() {
    let storage = Arc::new(FlakyStore {
        fail_remove: true,
        ..FlakyStore::default()
    });
    let past = Utc::now() - Duration::minutes(1);
    let record = CacheRecord {
        data: Some(7u32),
        expires_at: past,
        last_accessed_at: past,
    };
    storage
        .inner
        .set("app:gone", record.encode().unwrap())
        .await
        .unwrap();

    let cache = Cache::new(Arc::clone(&storage), CacheConfig::for_app("app"));
    let result = cache.find::<u32>("gone").await.unwrap();

    assert!(result.is_none());
}

#[tokio::test]
async fn test_prune_collects_removal_failures() {
    let storage = Arc::new(FlakyStore {
        fail_remove: true,
        ..FlakyStore::default()
    });
    let past = Utc::now() - Duration::minutes(1);
    for id in ["one", "two"] {
        let record = CacheRecord {
            data: Some(id.to_string()),
            expires_at: past,
            last_accessed_at: past,
        };
        storage
            .inner
            .set(&format!("app:{}", id), record.encode().unwrap())
            .await
            .unwrap();
    }

    let cache = Cache::new(Arc::clone(&storage), CacheConfig::for_app("app"));
    let report = cache.prune().await.unwrap();

    assert_eq!(report.scanned, 2);
    assert_eq!(report.removed, 0);
    assert_eq!(report.failures.len(), 2);
}

#[tokio::test]
async fn test_prune_empty_namespace_is_noop() {
    let storage = Arc::new(MemoryStore::new());
    let cache = Cache::new(Arc::clone(&storage), CacheConfig::for_app("app"));

    let first = cache.prune().await.unwrap();
    let second = cache.prune().await.unwrap();

    assert_eq!(first.removed, 0);
    assert_eq!(second.removed, 0);
    assert!(storage.is_empty().await);
}

// == Concurrency Tests ==

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_enforcement_does_not_overlap() {
    let storage = Arc::new(MemoryStore::new());
    let unit = seed_lru_records(&storage).await;
    let config = CacheConfig::default()
        .with_namespace("ns:")
        .with_quota(3 * unit, 2 * unit);
    let cache = Arc::new(Cache::new(Arc::clone(&storage), config));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.enforce_quota().await.unwrap() })
        })
        .collect();

    let mut evicted_total = 0;
    for handle in handles {
        if let QuotaOutcome::Evicted { evicted, .. } = handle.await.unwrap() {
            evicted_total += evicted;
        }
    }

    // However the passes interleave, only the two oldest records are evicted
    assert_eq!(evicted_total, 2);
    assert_eq!(storage.keys().await.unwrap(), vec!["ns:C", "ns:D"]);
}

// == Persistent Store Tests ==

#[tokio::test]
async fn test_cache_over_file_store_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.json");

    {
        let storage = Arc::new(FileStore::open(&path).await.unwrap());
        let cache = Cache::new(storage, CacheConfig::for_app("app"));
        cache.store("known", Some(vec![1, 2, 3])).await.unwrap();
        cache.store::<Vec<i32>>("unknown", None).await.unwrap();
    }

    let storage = Arc::new(FileStore::open(&path).await.unwrap());
    let cache = Cache::new(storage, CacheConfig::for_app("app"));

    let known = cache.find::<Vec<i32>>("known").await.unwrap().unwrap();
    assert_eq!(known.data, Some(vec![1, 2, 3]));

    let unknown = cache.find::<Vec<i32>>("unknown").await.unwrap().unwrap();
    assert!(unknown.is_negative());
}

#[tokio::test]
async fn test_legacy_records_are_evicted_first() {
    let storage = Arc::new(MemoryStore::new());
    storage
        .set(
            "ns:legacy",
            r#"{"data":"payload","expirationDateUtc":"2099-01-01T00:00:00Z"}"#.to_string(),
        )
        .await
        .unwrap();
    storage
        .set("ns:recent", lru_record(0).encode().unwrap())
        .await
        .unwrap();

    let usage = Cache::new(
        Arc::clone(&storage),
        CacheConfig::default().with_namespace("ns:"),
    )
    .usage()
    .usage_in_bytes(Scope::Namespace)
    .await
    .unwrap();

    let config = CacheConfig::default()
        .with_namespace("ns:")
        .with_quota(usage - 1, usage - 2);
    let cache = Cache::new(Arc::clone(&storage), config);
    cache.enforce_quota().await.unwrap();

    assert_eq!(storage.keys().await.unwrap(), vec!["ns:recent"]);
}
