//! Configuration Module
//!
//! Holds the namespace and quota thresholds a cache instance runs with.

use std::env;
use std::time::Duration;

use crate::error::{CacheError, Result};

const MB: u64 = 1024 * 1024;

/// Cache configuration parameters.
///
/// Passed explicitly to [`crate::Cache`]; nothing is read from global state
/// after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Key prefix isolating this cache inside a shared store
    pub namespace: String,
    /// Namespace usage above which quota enforcement kicks in
    pub quota_max_bytes: u64,
    /// Usage that eviction drains down to
    pub quota_target_bytes: u64,
    /// Background maintenance interval in seconds
    pub maintenance_interval_secs: u64,
}

impl CacheConfig {
    pub const DEFAULT_NAMESPACE: &'static str = "quota-cache:";
    pub const DEFAULT_QUOTA_MAX_BYTES: u64 = 5 * MB;
    pub const DEFAULT_QUOTA_TARGET_BYTES: u64 = 5 * MB / 2;
    pub const DEFAULT_MAINTENANCE_INTERVAL_SECS: u64 = 3600;

    /// Creates a config for the given application id.
    ///
    /// The namespace becomes `"{app_id}:"`.
    pub fn for_app(app_id: &str) -> Self {
        Self {
            namespace: format!("{}:", app_id),
            ..Self::default()
        }
    }

    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_APP_ID` - Application id, namespace becomes `"{id}:"`
    /// - `CACHE_QUOTA_MAX_BYTES` - Enforcement threshold (default: 5 MiB)
    /// - `CACHE_QUOTA_TARGET_BYTES` - Eviction target (default: 2.5 MiB)
    /// - `CACHE_MAINTENANCE_INTERVAL` - Maintenance frequency in seconds (default: 3600)
    pub fn from_env() -> Self {
        let namespace = env::var("CACHE_APP_ID")
            .ok()
            .filter(|v| !v.is_empty())
            .map(|id| format!("{}:", id))
            .unwrap_or_else(|| Self::DEFAULT_NAMESPACE.to_string());

        Self {
            namespace,
            quota_max_bytes: env::var("CACHE_QUOTA_MAX_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(Self::DEFAULT_QUOTA_MAX_BYTES),
            quota_target_bytes: env::var("CACHE_QUOTA_TARGET_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(Self::DEFAULT_QUOTA_TARGET_BYTES),
            maintenance_interval_secs: env::var("CACHE_MAINTENANCE_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(Self::DEFAULT_MAINTENANCE_INTERVAL_SECS),
        }
    }

    /// Replaces the namespace prefix.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Replaces both quota thresholds.
    pub fn with_quota(mut self, max_bytes: u64, target_bytes: u64) -> Self {
        self.quota_max_bytes = max_bytes;
        self.quota_target_bytes = target_bytes;
        self
    }

    /// Maintenance interval as a Duration.
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    /// Checks that the namespace is set and `0 < target < max`.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(CacheError::InvalidConfig(
                "namespace must not be empty".to_string(),
            ));
        }
        if self.quota_target_bytes == 0 {
            return Err(CacheError::InvalidConfig(
                "quota_target_bytes must be positive".to_string(),
            ));
        }
        if self.quota_target_bytes >= self.quota_max_bytes {
            return Err(CacheError::InvalidConfig(format!(
                "quota_target_bytes ({}) must be below quota_max_bytes ({})",
                self.quota_target_bytes, self.quota_max_bytes
            )));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: Self::DEFAULT_NAMESPACE.to_string(),
            quota_max_bytes: Self::DEFAULT_QUOTA_MAX_BYTES,
            quota_target_bytes: Self::DEFAULT_QUOTA_TARGET_BYTES,
            maintenance_interval_secs: Self::DEFAULT_MAINTENANCE_INTERVAL_SECS,
        }
    }
}
