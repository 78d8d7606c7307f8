//! Storage backend adapters
//!
//! Each physical storage mechanism is wrapped behind [`BackendAdapter`] so
//! the coordinator never sees mechanism-specific types or error models:
//!
//! - [`RequestCache`] - ephemeral in-process request cache
//! - [`KeyValueStore`] - string to string store persisted as one snapshot
//! - [`StructuredStore`] - versioned record store that must be opened first

mod key_value;
mod request_cache;
mod structured;

pub use key_value::{KeyValueStore, DEFAULT_KEY_VALUE_LIMIT};
pub use request_cache::RequestCache;
pub use structured::{StructuredStore, DEFAULT_SCHEMA_VERSION};

use crate::entry::{CachedEntry, Origin, ResourceKey};
use crate::errors::BackendResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The known kinds of storage mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    RequestCache,
    KeyValue,
    Structured,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [Self::RequestCache, Self::KeyValue, Self::Structured];

    /// Stable name used in logs, failure records and `FAILOVER_CACHE_DISABLE`
    pub const fn default_name(&self) -> &'static str {
        self.origin().as_str()
    }

    /// Origin tag for entries served by this kind of backend
    pub const fn origin(&self) -> Origin {
        match self {
            Self::RequestCache => Origin::RequestCache,
            Self::KeyValue => Origin::KeyValue,
            Self::Structured => Origin::Structured,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_name())
    }
}

/// Static description of a registered backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendDescriptor {
    pub name: String,
    pub kind: BackendKind,
    /// Detected once by the capability probe
    pub available: bool,
    /// Lower is tried first
    pub priority: i32,
    pub size_limit_bytes: Option<u64>,
    /// Position in registration order, the tie-break for equal priorities
    pub registration: usize,
}

/// Point-in-time footprint of a backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackendUsage {
    pub entries: u64,
    pub bytes: u64,
}

/// Uniform interface over one physical storage mechanism
///
/// `get` reports absence as `Ok(None)`. `put` must never leave a partially
/// written entry visible to readers and must fail with
/// [`BackendError::QuotaExceeded`](crate::errors::BackendError::QuotaExceeded)
/// when the write would exceed the backend's size limit.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    fn size_limit_bytes(&self) -> Option<u64> {
        None
    }

    /// Structural availability check, run once by the capability probe
    async fn probe(&self) -> bool;

    async fn get(&self, key: &ResourceKey) -> BackendResult<Option<CachedEntry>>;

    async fn put(&self, key: &ResourceKey, entry: &CachedEntry) -> BackendResult<()>;

    /// Deleting an absent key succeeds
    async fn delete(&self, key: &ResourceKey) -> BackendResult<()>;

    async fn clear(&self) -> BackendResult<()>;

    /// Drop the oldest entries until at least `bytes_needed` are freed,
    /// returning the number of bytes actually freed
    async fn evict(&self, _bytes_needed: u64) -> BackendResult<u64> {
        Ok(0)
    }

    async fn usage(&self) -> BackendResult<BackendUsage>;
}

/// Pick the oldest candidates whose sizes add up to at least `bytes_needed`
pub(crate) fn oldest_first<K>(
    mut candidates: Vec<(K, DateTime<Utc>, u64)>,
    bytes_needed: u64,
) -> (Vec<K>, u64) {
    candidates.sort_by_key(|(_, stored_at, _)| *stored_at);

    let mut freed = 0u64;
    let mut victims = Vec::new();
    for (key, _, size) in candidates {
        if freed >= bytes_needed {
            break;
        }
        freed = freed.saturating_add(size);
        victims.push(key);
    }
    (victims, freed)
}
