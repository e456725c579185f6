//! File Store
//!
//! Persistent store kept as a single JSON object on disk and mirrored in
//! memory. Reads never touch the disk; every mutation rewrites the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::memory::check_capacity;
use super::BackingStore;
use crate::error::{CacheError, Result};

// == File Store ==
/// JSON-file backed [`BackingStore`].
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
    capacity_bytes: Option<u64>,
}

impl FileStore {
    /// Opens the store at `path`, loading existing contents if the file exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
            entries: RwLock::new(BTreeMap::new()),
            capacity_bytes: None,
        };
        store.refresh().await?;
        Ok(store)
    }

    /// Sets a byte quota on key + value totals.
    pub fn with_capacity_bytes(mut self, capacity_bytes: u64) -> Self {
        self.capacity_bytes = Some(capacity_bytes);
        self
    }

    /// Reloads the in-memory mirror from disk.
    ///
    /// A missing file yields an empty store. Entries whose value is not a
    /// JSON string are skipped.
    pub async fn refresh(&self) -> Result<()> {
        let loaded = read_entries(&self.path).await?;
        debug!("Loaded {} entries from {}", loaded.len(), self.path.display());
        *self.entries.write().await = loaded;
        Ok(())
    }

    async fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let object: Map<String, Value> = entries
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let contents = serde_json::to_vec(&Value::Object(object))?;

        // Write beside the target, then swap it in
        let tmp_path = temp_path(&self.path);
        tokio::fs::write(&tmp_path, contents)
            .await
            .map_err(|e| io_failure(&tmp_path, e))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| io_failure(&self.path, e))
    }
}

#[async_trait]
impl BackingStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut entries = self.entries.write().await;

        if let Some(capacity) = self.capacity_bytes {
            check_capacity(&entries, key, &value, capacity)?;
        }

        // Apply in memory, rolling back if the file cannot be written
        let previous = entries.insert(key.to_string(), value);
        if let Err(e) = self.persist(&entries).await {
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        // Absent keys never touch the disk
        if let Some(old) = entries.remove(key) {
            if let Err(e) = self.persist(&entries).await {
                entries.insert(key.to_string(), old);
                return Err(e);
            }
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}

async fn read_entries(path: &Path) -> Result<BTreeMap<String, String>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(io_failure(path, e)),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(BTreeMap::new());
    }

    let object: Map<String, Value> = serde_json::from_slice(&bytes).map_err(|e| {
        CacheError::StoreFailure(format!("{} is not a JSON object: {}", path.display(), e))
    })?;

    let mut entries = BTreeMap::new();
    for (key, value) in object {
        match value {
            Value::String(s) => {
                entries.insert(key, s);
            }
            _ => warn!("Skipping non-string value for '{}' in {}", key, path.display()),
        }
    }
    Ok(entries)
}

/// `<file name>.tmp` in the same directory, distinct for every target name.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

fn io_failure(path: &Path, e: std::io::Error) -> CacheError {
    CacheError::StoreFailure(format!("{}: {}", path.display(), e))
}
