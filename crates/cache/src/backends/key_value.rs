//! Key-value store
//!
//! Plain string keys mapped to string values, the way a browser's local
//! storage behaves. Entries are stored as their JSON text and the whole map
//! is persisted as a single snapshot file, rewritten atomically after every
//! mutation. The size limit covers every key and value byte in the store.

use super::{oldest_first, BackendAdapter, BackendKind, BackendUsage};
use crate::entry::{CachedEntry, ResourceKey};
use crate::errors::{BackendError, BackendResult, SerializationOp};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use failover_utils::write_atomic;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};

/// Browsers cap local storage at roughly this much per origin
pub const DEFAULT_KEY_VALUE_LIMIT: u64 = 10 * 1024 * 1024;

#[derive(Default)]
struct Snapshot {
    items: BTreeMap<String, String>,
    bytes: u64,
}

impl Snapshot {
    fn from_items(items: BTreeMap<String, String>) -> Self {
        let bytes = items.iter().map(|(k, v)| item_size(k, v)).sum();
        Self { items, bytes }
    }

    fn insert(&mut self, key: String, value: String) -> Option<String> {
        self.bytes += item_size(&key, &value);
        let previous = self.items.insert(key.clone(), value);
        if let Some(old) = &previous {
            self.bytes -= item_size(&key, old);
        }
        previous
    }

    fn remove(&mut self, key: &str) -> Option<String> {
        let removed = self.items.remove(key);
        if let Some(old) = &removed {
            self.bytes -= item_size(key, old);
        }
        removed
    }
}

fn item_size(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}

pub struct KeyValueStore {
    name: String,
    path: PathBuf,
    size_limit: Option<u64>,
    snapshot: Mutex<Option<Snapshot>>,
}

impl KeyValueStore {
    /// Store persisted at `path`, a JSON file created on first write
    pub fn new(path: impl Into<PathBuf>, size_limit: Option<u64>) -> Self {
        Self::named(BackendKind::KeyValue.default_name(), path, size_limit)
    }

    pub fn named(name: impl Into<String>, path: impl Into<PathBuf>, size_limit: Option<u64>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            size_limit,
            snapshot: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> BackendResult<Snapshot> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Snapshot::default()),
            Err(e) => {
                return Err(BackendError::io(
                    &self.name,
                    &self.path,
                    "read key-value snapshot",
                    e,
                ))
            }
        };

        match serde_json::from_slice::<BTreeMap<String, String>>(&bytes) {
            Ok(items) => {
                tracing::debug!(
                    backend = %self.name,
                    entries = items.len(),
                    "loaded key-value snapshot"
                );
                Ok(Snapshot::from_items(items))
            }
            Err(e) => Err(BackendError::corruption(
                &self.name,
                "*",
                format!("snapshot '{}' is not a string map: {e}", self.path.display()),
            )),
        }
    }

    async fn persist(&self, snapshot: &Snapshot) -> BackendResult<()> {
        let encoded = match serde_json::to_vec(&snapshot.items) {
            Ok(encoded) => encoded,
            Err(e) => {
                return Err(BackendError::serialization(
                    &self.name,
                    "*",
                    SerializationOp::Encode,
                    e,
                ))
            }
        };

        write_atomic(&self.path, &encoded)
            .await
            .map_err(|e| BackendError::io(&self.name, &self.path, "write key-value snapshot", e))
    }

    /// Lock the snapshot, loading it from disk on first use
    ///
    /// A failed load leaves the slot empty so the next call retries.
    async fn loaded(&self) -> BackendResult<MutexGuard<'_, Option<Snapshot>>> {
        let mut guard = self.snapshot.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        Ok(guard)
    }

    fn decode(&self, key: &ResourceKey, raw: &str) -> BackendResult<CachedEntry> {
        let entry: CachedEntry = serde_json::from_str(raw).map_err(|e| {
            BackendError::serialization(&self.name, key.as_str(), SerializationOp::Decode, e)
        })?;
        if entry.key() != key {
            return Err(BackendError::corruption(
                &self.name,
                key.as_str(),
                format!("stored entry belongs to key '{}'", entry.key()),
            ));
        }
        Ok(entry)
    }
}

impl std::fmt::Debug for KeyValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValueStore")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("size_limit", &self.size_limit)
            .finish()
    }
}

#[async_trait]
impl BackendAdapter for KeyValueStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::KeyValue
    }

    fn size_limit_bytes(&self) -> Option<u64> {
        self.size_limit
    }

    async fn probe(&self) -> bool {
        match self.path.parent() {
            Some(parent) => fs::create_dir_all(parent).await.is_ok(),
            None => false,
        }
    }

    async fn get(&self, key: &ResourceKey) -> BackendResult<Option<CachedEntry>> {
        let mut guard = self.loaded().await?;
        let snapshot = guard.get_or_insert_with(Snapshot::default);
        match snapshot.items.get(key.as_str()) {
            Some(raw) => self.decode(key, raw).map(Some),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &ResourceKey, entry: &CachedEntry) -> BackendResult<()> {
        let encoded = match serde_json::to_string(entry) {
            Ok(encoded) => encoded,
            Err(e) => {
                return Err(BackendError::serialization(
                    &self.name,
                    key.as_str(),
                    SerializationOp::Encode,
                    e,
                ))
            }
        };
        let requested = item_size(key.as_str(), &encoded);

        let mut guard = self.loaded().await?;
        let snapshot = guard.get_or_insert_with(Snapshot::default);

        if let Some(limit) = self.size_limit {
            let replaced = snapshot
                .items
                .get(key.as_str())
                .map(|old| item_size(key.as_str(), old))
                .unwrap_or(0);
            let projected = snapshot.bytes - replaced + requested;
            if projected > limit {
                return Err(BackendError::quota_exceeded(&self.name, requested, limit));
            }
        }

        let previous = snapshot.insert(key.as_str().to_string(), encoded);
        if let Err(e) = self.persist(snapshot).await {
            // Roll back so memory never diverges from disk
            match previous {
                Some(old) => {
                    snapshot.insert(key.as_str().to_string(), old);
                }
                None => {
                    snapshot.remove(key.as_str());
                }
            }
            return Err(e);
        }
        Ok(())
    }

    async fn delete(&self, key: &ResourceKey) -> BackendResult<()> {
        let mut guard = self.loaded().await?;
        let snapshot = guard.get_or_insert_with(Snapshot::default);

        let Some(old) = snapshot.remove(key.as_str()) else {
            return Ok(());
        };
        if let Err(e) = self.persist(snapshot).await {
            snapshot.insert(key.as_str().to_string(), old);
            return Err(e);
        }
        Ok(())
    }

    async fn clear(&self) -> BackendResult<()> {
        let mut guard = self.snapshot.lock().await;
        match fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(BackendError::io(
                    &self.name,
                    &self.path,
                    "remove key-value snapshot",
                    e,
                ))
            }
        }
        *guard = Some(Snapshot::default());
        Ok(())
    }

    async fn evict(&self, bytes_needed: u64) -> BackendResult<u64> {
        let mut guard = self.loaded().await?;
        let snapshot = guard.get_or_insert_with(Snapshot::default);

        let candidates = snapshot
            .items
            .iter()
            .map(|(key, raw)| {
                // Unreadable values go first
                let stored_at = serde_json::from_str::<CachedEntry>(raw)
                    .map(|entry| entry.stored_at())
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                (key.clone(), stored_at, item_size(key, raw))
            })
            .collect();

        let (victims, freed) = oldest_first(candidates, bytes_needed);
        if victims.is_empty() {
            return Ok(0);
        }

        let removed: Vec<(String, String)> = victims
            .into_iter()
            .filter_map(|key| snapshot.remove(&key).map(|raw| (key, raw)))
            .collect();

        if let Err(e) = self.persist(snapshot).await {
            for (key, raw) in removed {
                snapshot.insert(key, raw);
            }
            return Err(e);
        }

        tracing::debug!(backend = %self.name, freed, "evicted key-value entries");
        Ok(freed)
    }

    async fn usage(&self) -> BackendResult<BackendUsage> {
        let mut guard = self.loaded().await?;
        let snapshot = guard.get_or_insert_with(Snapshot::default);
        Ok(BackendUsage {
            entries: snapshot.items.len() as u64,
            bytes: snapshot.bytes,
        })
    }
}
