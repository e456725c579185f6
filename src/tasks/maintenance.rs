//! Maintenance Task
//!
//! Background task that periodically prunes expired records and enforces the
//! store quota.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{Cache, QuotaOutcome};
use crate::storage::BackingStore;

/// Spawns a background task that keeps `cache` within its quota.
///
/// The task runs in an infinite loop, sleeping for `interval` between runs.
/// Each run prunes expired records, then runs a quota pass. Errors are logged
/// and the loop carries on.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during shutdown.
///
/// # Example
/// ```ignore
/// let cache = Arc::new(Cache::new(Arc::new(MemoryStore::new()), config.clone()));
/// let handle = spawn_maintenance_task(cache.clone(), config.maintenance_interval());
/// // Later, during shutdown:
/// handle.abort();
/// ```
pub fn spawn_maintenance_task<S>(cache: Arc<Cache<S>>, interval: Duration) -> JoinHandle<()>
where
    S: BackingStore + 'static,
{
    tokio::spawn(async move {
        info!(
            "Starting cache maintenance task with interval of {:?} for '{}'",
            interval,
            cache.config().namespace
        );

        loop {
            tokio::time::sleep(interval).await;

            match cache.prune().await {
                Ok(report) if !report.failures.is_empty() => warn!(
                    "Maintenance prune: {} removed, {} failures",
                    report.removed,
                    report.failures.len()
                ),
                Ok(report) => debug!("Maintenance prune: {} removed", report.removed),
                Err(e) => warn!("Maintenance prune failed: {}", e),
            }

            match cache.enforce_quota().await {
                Ok(QuotaOutcome::Evicted { evicted, .. }) => {
                    info!("Maintenance quota pass: evicted {} records", evicted)
                }
                Ok(outcome) => debug!("Maintenance quota pass: {:?}", outcome),
                Err(e) => warn!("Maintenance quota pass failed: {}", e),
            }
        }
    })
}
