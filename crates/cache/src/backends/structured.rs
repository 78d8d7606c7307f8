//! Structured store
//!
//! A versioned on-disk database modelled on a browser's indexed database.
//! Nothing can be read or written before the connection is opened: the open
//! handshake creates the directory layout, checks the manifest version and
//! runs an upgrade (dropping every record) when the on-disk schema is older.
//!
//! Layout:
//!
//! ```text
//! <root>/manifest.json
//! <root>/records/<2 hex>/<sha256(key) hex>.rec
//! ```
//!
//! Every record is a 16 byte header followed by a bincode payload. The header
//! carries a magic tag, the record format version and a CRC32C of the payload
//! so torn or tampered files are reported as corruption instead of garbage.

use super::{oldest_first, BackendAdapter, BackendKind, BackendUsage};
use crate::entry::{CachedEntry, Origin, ResourceKey};
use crate::errors::{BackendError, BackendResult, SerializationOp};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crc32c::crc32c;
use failover_utils::write_atomic;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::fs;
use tokio::sync::{Mutex, OnceCell};

/// Magic tag for record files: "FOCR"
const RECORD_MAGIC: [u8; 4] = *b"FOCR";

/// Current record format version
const RECORD_FORMAT: u16 = 1;

const HEADER_LEN: usize = 16;

/// Schema version written to the manifest by default
pub const DEFAULT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    name: String,
    version: u32,
}

/// What the open handshake found in `manifest.json`
enum OnDisk {
    Missing,
    Unreadable,
    Version(u32),
}

/// On-disk payload of a record
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    key: String,
    stored_at: DateTime<Utc>,
    origin: Origin,
    /// JSON text of the value; bincode cannot carry self-describing data
    value_json: Vec<u8>,
}

#[derive(Debug)]
struct Connection {
    records_dir: PathBuf,
    bytes_used: AtomicU64,
}

pub struct StructuredStore {
    name: String,
    root: PathBuf,
    version: u32,
    size_limit: Option<u64>,
    connection: OnceCell<Connection>,
    closed: AtomicBool,
    write_lock: Mutex<()>,
}

impl StructuredStore {
    pub fn new(root: impl Into<PathBuf>, size_limit: Option<u64>) -> Self {
        Self::named(BackendKind::Structured.default_name(), root, size_limit)
    }

    pub fn named(name: impl Into<String>, root: impl Into<PathBuf>, size_limit: Option<u64>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            version: DEFAULT_SCHEMA_VERSION,
            size_limit,
            connection: OnceCell::new(),
            closed: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        }
    }

    /// Request a schema version; opening an older database upgrades it
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Close the connection; every later operation fails as unavailable
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        tracing::debug!(backend = %self.name, "structured store connection closed");
    }

    async fn connection(&self) -> BackendResult<&Connection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::unavailable(&self.name, "connection closed"));
        }
        self.connection.get_or_try_init(|| self.open()).await
    }

    /// Open handshake: layout, manifest check and upgrade
    async fn open(&self) -> BackendResult<Connection> {
        let records_dir = self.root.join("records");
        let manifest_path = self.root.join("manifest.json");

        if let Err(e) = fs::create_dir_all(&records_dir).await {
            return Err(BackendError::io(
                &self.name,
                &records_dir,
                "create records directory",
                e,
            ));
        }

        let on_disk = match fs::read(&manifest_path).await {
            Ok(bytes) => match serde_json::from_slice::<Manifest>(&bytes) {
                Ok(manifest) => OnDisk::Version(manifest.version),
                Err(e) => {
                    tracing::warn!(
                        backend = %self.name,
                        path = %manifest_path.display(),
                        error = %e,
                        "unreadable manifest"
                    );
                    OnDisk::Unreadable
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => OnDisk::Missing,
            Err(e) => {
                return Err(BackendError::io(
                    &self.name,
                    &manifest_path,
                    "read manifest",
                    e,
                ))
            }
        };

        match on_disk {
            OnDisk::Version(version) if version > self.version => {
                return Err(BackendError::unavailable(
                    &self.name,
                    format!(
                        "database version {version} is newer than requested version {}",
                        self.version
                    ),
                ));
            }
            OnDisk::Version(version) if version < self.version => {
                tracing::info!(
                    backend = %self.name,
                    from = version,
                    to = self.version,
                    "upgrading structured store, dropping existing records"
                );
                self.reset_records(&records_dir).await?;
                self.write_manifest(&manifest_path).await?;
            }
            // Records cannot be trusted without a schema version
            OnDisk::Unreadable => {
                tracing::info!(
                    backend = %self.name,
                    to = self.version,
                    "rebuilding structured store, dropping existing records"
                );
                self.reset_records(&records_dir).await?;
                self.write_manifest(&manifest_path).await?;
            }
            OnDisk::Version(_) => {}
            OnDisk::Missing => self.write_manifest(&manifest_path).await?,
        }

        let connection = Connection {
            bytes_used: AtomicU64::new(0),
            records_dir,
        };
        let (_, bytes) = self.scan_sizes(&connection).await?;
        connection.bytes_used.store(bytes, Ordering::Relaxed);

        tracing::debug!(
            backend = %self.name,
            root = %self.root.display(),
            version = self.version,
            bytes,
            "structured store opened"
        );
        Ok(connection)
    }

    async fn write_manifest(&self, path: &Path) -> BackendResult<()> {
        let manifest = Manifest {
            name: self.name.clone(),
            version: self.version,
        };
        let encoded = match serde_json::to_vec_pretty(&manifest) {
            Ok(encoded) => encoded,
            Err(e) => {
                return Err(BackendError::serialization(
                    &self.name,
                    "manifest",
                    SerializationOp::Encode,
                    e,
                ))
            }
        };
        write_atomic(path, &encoded)
            .await
            .map_err(|e| BackendError::io(&self.name, path, "write manifest", e))
    }

    async fn reset_records(&self, records_dir: &Path) -> BackendResult<()> {
        match fs::remove_dir_all(records_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(BackendError::io(
                    &self.name,
                    records_dir,
                    "remove records directory",
                    e,
                ))
            }
        }
        fs::create_dir_all(records_dir)
            .await
            .map_err(|e| BackendError::io(&self.name, records_dir, "create records directory", e))
    }

    fn record_path(connection: &Connection, key: &ResourceKey) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_str().as_bytes()));
        connection
            .records_dir
            .join(&digest[..2])
            .join(format!("{digest}.rec"))
    }

    fn encode(&self, entry: &CachedEntry) -> BackendResult<Vec<u8>> {
        let key = entry.key().as_str();
        let value_json = match serde_json::to_vec(entry.value()) {
            Ok(json) => json,
            Err(e) => {
                return Err(BackendError::serialization(
                    &self.name,
                    key,
                    SerializationOp::Encode,
                    e,
                ))
            }
        };
        let record = StoredRecord {
            key: key.to_string(),
            stored_at: entry.stored_at(),
            origin: entry.origin(),
            value_json,
        };
        let payload = match bincode::serialize(&record) {
            Ok(payload) => payload,
            Err(e) => {
                return Err(BackendError::serialization(
                    &self.name,
                    key,
                    SerializationOp::Encode,
                    e,
                ))
            }
        };

        let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
        bytes.extend_from_slice(&RECORD_MAGIC);
        bytes.extend_from_slice(&RECORD_FORMAT.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&crc32c(&payload).to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    fn decode(&self, key: &str, bytes: &[u8]) -> BackendResult<StoredRecord> {
        if bytes.len() < HEADER_LEN {
            return Err(BackendError::corruption(
                &self.name,
                key,
                format!("record truncated to {} bytes", bytes.len()),
            ));
        }
        let (header, payload) = bytes.split_at(HEADER_LEN);

        if header[0..4] != RECORD_MAGIC {
            return Err(BackendError::corruption(&self.name, key, "invalid magic tag"));
        }
        let format = u16::from_le_bytes([header[4], header[5]]);
        if format > RECORD_FORMAT {
            return Err(BackendError::corruption(
                &self.name,
                key,
                format!("unsupported record format {format}"),
            ));
        }
        let expected_crc = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        let expected_len = u32::from_le_bytes([header[12], header[13], header[14], header[15]]);

        if payload.len() != expected_len as usize {
            return Err(BackendError::corruption(
                &self.name,
                key,
                format!(
                    "payload length mismatch: expected {expected_len}, got {}",
                    payload.len()
                ),
            ));
        }
        let actual_crc = crc32c(payload);
        if actual_crc != expected_crc {
            return Err(BackendError::corruption(
                &self.name,
                key,
                format!("checksum mismatch: expected {expected_crc:08x}, got {actual_crc:08x}"),
            ));
        }

        bincode::deserialize(payload)
            .map_err(|e| BackendError::serialization(&self.name, key, SerializationOp::Decode, e))
    }

    fn into_entry(&self, record: StoredRecord) -> BackendResult<CachedEntry> {
        let value = serde_json::from_slice(&record.value_json).map_err(|e| {
            BackendError::serialization(&self.name, &record.key, SerializationOp::Decode, e)
        })?;
        Ok(CachedEntry::with_timestamp(
            record.key,
            value,
            record.origin,
            record.stored_at,
        ))
    }

    /// Every record file under the records directory
    async fn record_files(&self, connection: &Connection) -> BackendResult<Vec<(PathBuf, u64)>> {
        let mut files = Vec::new();
        let dir = &connection.records_dir;
        let mut shards = fs::read_dir(dir)
            .await
            .map_err(|e| BackendError::io(&self.name, dir, "list records", e))?;

        while let Some(shard) = shards
            .next_entry()
            .await
            .map_err(|e| BackendError::io(&self.name, dir, "list records", e))?
        {
            match shard.file_type().await {
                Ok(file_type) if file_type.is_dir() => {}
                _ => continue,
            }
            let shard_path = shard.path();
            let mut records = fs::read_dir(&shard_path)
                .await
                .map_err(|e| BackendError::io(&self.name, &shard_path, "list shard", e))?;
            while let Some(record) = records
                .next_entry()
                .await
                .map_err(|e| BackendError::io(&self.name, &shard_path, "list shard", e))?
            {
                let path = record.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("rec") {
                    continue;
                }
                let size = match record.metadata().await {
                    Ok(meta) => meta.len(),
                    // Removed between listing and stat
                    Err(_) => continue,
                };
                files.push((path, size));
            }
        }
        Ok(files)
    }

    async fn scan_sizes(&self, connection: &Connection) -> BackendResult<(u64, u64)> {
        let files = self.record_files(connection).await?;
        let bytes = files.iter().map(|(_, size)| size).sum();
        Ok((files.len() as u64, bytes))
    }

    async fn existing_size(path: &Path) -> u64 {
        fs::metadata(path).await.map(|meta| meta.len()).unwrap_or(0)
    }
}

impl std::fmt::Debug for StructuredStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuredStore")
            .field("name", &self.name)
            .field("root", &self.root)
            .field("version", &self.version)
            .field("open", &self.connection.initialized())
            .finish()
    }
}

#[async_trait]
impl BackendAdapter for StructuredStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Structured
    }

    fn size_limit_bytes(&self) -> Option<u64> {
        self.size_limit
    }

    async fn probe(&self) -> bool {
        fs::create_dir_all(&self.root).await.is_ok()
    }

    async fn get(&self, key: &ResourceKey) -> BackendResult<Option<CachedEntry>> {
        let connection = self.connection().await?;
        let path = Self::record_path(connection, key);

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BackendError::io(&self.name, &path, "read record", e)),
        };

        let record = self.decode(key.as_str(), &bytes)?;
        if record.key != key.as_str() {
            return Err(BackendError::corruption(
                &self.name,
                key.as_str(),
                format!("record belongs to key '{}'", record.key),
            ));
        }
        self.into_entry(record).map(Some)
    }

    async fn put(&self, key: &ResourceKey, entry: &CachedEntry) -> BackendResult<()> {
        let connection = self.connection().await?;
        let path = Self::record_path(connection, key);
        let bytes = self.encode(entry)?;
        let size = bytes.len() as u64;

        let _guard = self.write_lock.lock().await;
        let replaced = Self::existing_size(&path).await;

        if let Some(limit) = self.size_limit {
            let projected = connection
                .bytes_used
                .load(Ordering::Relaxed)
                .saturating_sub(replaced)
                .saturating_add(size);
            if projected > limit {
                return Err(BackendError::quota_exceeded(&self.name, size, limit));
            }
        }

        write_atomic(&path, &bytes)
            .await
            .map_err(|e| BackendError::io(&self.name, &path, "write record", e))?;

        let used = connection.bytes_used.load(Ordering::Relaxed);
        connection
            .bytes_used
            .store(used.saturating_sub(replaced) + size, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &ResourceKey) -> BackendResult<()> {
        let connection = self.connection().await?;
        let path = Self::record_path(connection, key);

        let _guard = self.write_lock.lock().await;
        let size = Self::existing_size(&path).await;
        match fs::remove_file(&path).await {
            Ok(()) => {
                connection.bytes_used.fetch_sub(
                    size.min(connection.bytes_used.load(Ordering::Relaxed)),
                    Ordering::Relaxed,
                );
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BackendError::io(&self.name, &path, "remove record", e)),
        }
    }

    async fn clear(&self) -> BackendResult<()> {
        let connection = self.connection().await?;
        let _guard = self.write_lock.lock().await;
        self.reset_records(&connection.records_dir).await?;
        connection.bytes_used.store(0, Ordering::Relaxed);
        Ok(())
    }

    async fn evict(&self, bytes_needed: u64) -> BackendResult<u64> {
        let connection = self.connection().await?;
        let _guard = self.write_lock.lock().await;

        let mut candidates = Vec::new();
        for (path, size) in self.record_files(connection).await? {
            // Unreadable records are evicted first
            let stored_at = match fs::read(&path).await {
                Ok(bytes) => self
                    .decode("*", &bytes)
                    .map(|record| record.stored_at)
                    .unwrap_or(DateTime::<Utc>::MIN_UTC),
                Err(_) => continue,
            };
            candidates.push((path, stored_at, size));
        }

        let (victims, _) = oldest_first(candidates, bytes_needed);
        let mut freed = 0u64;
        for path in victims {
            let size = Self::existing_size(&path).await;
            match fs::remove_file(&path).await {
                Ok(()) => freed += size,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(BackendError::io(&self.name, &path, "evict record", e)),
            }
        }

        let used = connection.bytes_used.load(Ordering::Relaxed);
        connection
            .bytes_used
            .store(used.saturating_sub(freed), Ordering::Relaxed);
        tracing::debug!(backend = %self.name, freed, "evicted structured records");
        Ok(freed)
    }

    async fn usage(&self) -> BackendResult<BackendUsage> {
        let connection = self.connection().await?;
        let (entries, bytes) = self.scan_sizes(connection).await?;
        Ok(BackendUsage { entries, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn entry(key: &str, value: serde_json::Value) -> CachedEntry {
        CachedEntry::new(key, value, Origin::Network)
    }

    #[tokio::test]
    async fn test_basic_operations() -> BackendResult<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = StructuredStore::new(temp_dir.path().join("db"), None);
        assert!(store.probe().await);

        let key = ResourceKey::from("jsonapi/node/client?page=1");
        assert!(store.get(&key).await?.is_none());

        let stored = entry(key.as_str(), json!({"data": [{"id": "7"}]}));
        store.put(&key, &stored).await?;

        let hit = store.get(&key).await?.expect("record should exist");
        assert_eq!(hit, stored);

        store.delete(&key).await?;
        store.delete(&key).await?;
        assert!(store.get(&key).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_records_survive_reopen() -> BackendResult<()> {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("db");
        let key = ResourceKey::from("clients");

        let store = StructuredStore::new(&root, None);
        store.put(&key, &entry("clients", json!([1, 2, 3]))).await?;

        let reopened = StructuredStore::new(&root, None);
        let hit = reopened.get(&key).await?.expect("record should persist");
        assert_eq!(hit.value(), &json!([1, 2, 3]));
        assert_eq!(reopened.usage().await?.entries, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_upgrade_drops_records() -> BackendResult<()> {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("db");
        let key = ResourceKey::from("clients");

        let v1 = StructuredStore::new(&root, None);
        v1.put(&key, &entry("clients", json!("old schema"))).await?;

        let v2 = StructuredStore::new(&root, None).with_version(2);
        assert!(v2.get(&key).await?.is_none());

        // Opening with an older version than on disk is refused
        let stale = StructuredStore::new(&root, None);
        let err = stale.get(&key).await.unwrap_err();
        assert!(matches!(err, BackendError::Unavailable { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_unreadable_manifest_is_rebuilt() -> BackendResult<()> {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("db");
        let key = ResourceKey::from("clients");

        let store = StructuredStore::new(&root, None);
        store.put(&key, &entry("clients", json!("before"))).await?;
        std::fs::write(root.join("manifest.json"), b"garbage").unwrap();

        let reopened = StructuredStore::new(&root, None);
        assert!(reopened.get(&key).await?.is_none());
        assert_eq!(reopened.usage().await?.entries, 0);

        let manifest: Manifest =
            serde_json::from_slice(&std::fs::read(root.join("manifest.json")).unwrap()).unwrap();
        assert_eq!(manifest.version, DEFAULT_SCHEMA_VERSION);

        reopened.put(&key, &entry("clients", json!("after"))).await?;
        reopened.clear().await?;
        assert!(reopened.get(&key).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_corruption() -> BackendResult<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = StructuredStore::new(temp_dir.path().join("db"), None);
        let key = ResourceKey::from("clients");
        store.put(&key, &entry("clients", json!("intact"))).await?;

        let connection = store.connection().await?;
        let path = StructuredStore::record_path(connection, &key);
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();

        let err = store.get(&key).await.unwrap_err();
        assert!(err.is_corruption());
        Ok(())
    }

    #[tokio::test]
    async fn test_closed_connection() {
        let temp_dir = TempDir::new().unwrap();
        let store = StructuredStore::new(temp_dir.path().join("db"), None);
        store.close();

        let err = store.get(&ResourceKey::from("clients")).await.unwrap_err();
        assert!(matches!(err, BackendError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_quota_and_eviction() -> BackendResult<()> {
        let temp_dir = TempDir::new().unwrap();
        let probe_store = StructuredStore::new(temp_dir.path().join("probe"), None);
        let sample = entry("a", json!("x".repeat(100)));
        let record_size = probe_store.encode(&sample)?.len() as u64;

        let store = StructuredStore::new(temp_dir.path().join("db"), Some(record_size + 10));
        let old = CachedEntry::with_timestamp(
            "a",
            json!("x".repeat(100)),
            Origin::Network,
            Utc::now() - chrono::Duration::minutes(1),
        );
        store.put(old.key(), &old).await?;

        let new = entry("b", json!("y".repeat(100)));
        let err = store.put(new.key(), &new).await.unwrap_err();
        assert!(matches!(err, BackendError::QuotaExceeded { .. }));

        assert!(store.evict(1).await? > 0);
        store.put(new.key(), &new).await?;
        assert!(store.get(old.key()).await?.is_none());
        assert!(store.get(new.key()).await?.is_some());

        store.clear().await?;
        assert_eq!(store.usage().await?, BackendUsage::default());
        Ok(())
    }
}
