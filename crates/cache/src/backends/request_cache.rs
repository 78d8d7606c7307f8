//! Ephemeral request cache
//!
//! Lives only as long as the process. Reads are lock-free through a
//! `DashMap`; writes and evictions are serialized so the byte accounting
//! and the size limit check cannot race.

use super::{oldest_first, BackendAdapter, BackendKind, BackendUsage};
use crate::entry::{CachedEntry, ResourceKey};
use crate::errors::{BackendError, BackendResult};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct Slot {
    entry: Arc<CachedEntry>,
    size: u64,
}

pub struct RequestCache {
    name: String,
    entries: DashMap<ResourceKey, Slot>,
    total_bytes: AtomicU64,
    size_limit: Option<u64>,
    write_lock: Mutex<()>,
}

impl RequestCache {
    pub fn new(size_limit: Option<u64>) -> Self {
        Self::named(BackendKind::RequestCache.default_name(), size_limit)
    }

    pub fn named(name: impl Into<String>, size_limit: Option<u64>) -> Self {
        Self {
            name: name.into(),
            entries: DashMap::new(),
            total_bytes: AtomicU64::new(0),
            size_limit,
            write_lock: Mutex::new(()),
        }
    }

    fn remove_slot(&self, key: &ResourceKey) -> u64 {
        match self.entries.remove(key) {
            Some((_, slot)) => {
                self.total_bytes.fetch_sub(slot.size, Ordering::Relaxed);
                slot.size
            }
            None => 0,
        }
    }
}

impl std::fmt::Debug for RequestCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCache")
            .field("name", &self.name)
            .field("entry_count", &self.entries.len())
            .field("total_bytes", &self.total_bytes.load(Ordering::Relaxed))
            .finish()
    }
}

#[async_trait]
impl BackendAdapter for RequestCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::RequestCache
    }

    fn size_limit_bytes(&self) -> Option<u64> {
        self.size_limit
    }

    async fn probe(&self) -> bool {
        true
    }

    async fn get(&self, key: &ResourceKey) -> BackendResult<Option<CachedEntry>> {
        Ok(self
            .entries
            .get(key)
            .map(|slot| CachedEntry::clone(&slot.entry)))
    }

    async fn put(&self, key: &ResourceKey, entry: &CachedEntry) -> BackendResult<()> {
        let size = entry.size_hint();
        let _guard = self.write_lock.lock();

        let replaced = self.entries.get(key).map(|slot| slot.size).unwrap_or(0);
        if let Some(limit) = self.size_limit {
            let projected = self
                .total_bytes
                .load(Ordering::Relaxed)
                .saturating_sub(replaced)
                .saturating_add(size);
            if projected > limit {
                return Err(BackendError::quota_exceeded(&self.name, size, limit));
            }
        }

        let slot = Slot {
            entry: Arc::new(entry.clone()),
            size,
        };
        if let Some(old) = self.entries.insert(key.clone(), slot) {
            self.total_bytes.fetch_sub(old.size, Ordering::Relaxed);
        }
        self.total_bytes.fetch_add(size, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &ResourceKey) -> BackendResult<()> {
        let _guard = self.write_lock.lock();
        self.remove_slot(key);
        Ok(())
    }

    async fn clear(&self) -> BackendResult<()> {
        let _guard = self.write_lock.lock();
        self.entries.clear();
        self.total_bytes.store(0, Ordering::Relaxed);
        Ok(())
    }

    async fn evict(&self, bytes_needed: u64) -> BackendResult<u64> {
        let _guard = self.write_lock.lock();
        let candidates = self
            .entries
            .iter()
            .map(|item| (item.key().clone(), item.entry.stored_at(), item.size))
            .collect();

        let (victims, _) = oldest_first(candidates, bytes_needed);
        let freed = victims.iter().map(|key| self.remove_slot(key)).sum();
        tracing::debug!(backend = %self.name, freed, "evicted request cache entries");
        Ok(freed)
    }

    async fn usage(&self) -> BackendResult<BackendUsage> {
        Ok(BackendUsage {
            entries: self.entries.len() as u64,
            bytes: self.total_bytes.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Origin;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn entry(key: &str, value: serde_json::Value) -> CachedEntry {
        CachedEntry::new(key, value, Origin::Network)
    }

    #[tokio::test]
    async fn test_basic_operations() -> BackendResult<()> {
        let cache = RequestCache::new(None);
        let key = ResourceKey::from("clients");

        assert!(cache.get(&key).await?.is_none());

        cache.put(&key, &entry("clients", json!(["ada"]))).await?;
        let hit = cache.get(&key).await?.expect("entry should be cached");
        assert_eq!(hit.value(), &json!(["ada"]));

        // Overwrite replaces wholesale
        cache.put(&key, &entry("clients", json!(["grace"]))).await?;
        let hit = cache.get(&key).await?.expect("entry should be cached");
        assert_eq!(hit.value(), &json!(["grace"]));
        assert_eq!(cache.usage().await?.entries, 1);

        cache.delete(&key).await?;
        assert!(cache.get(&key).await?.is_none());

        // Idempotent delete
        cache.delete(&key).await?;
        assert_eq!(cache.usage().await?, BackendUsage::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_quota_leaves_state_unchanged() -> BackendResult<()> {
        let cache = RequestCache::new(Some(40));
        let small = entry("a", json!("tiny"));
        cache.put(small.key(), &small).await?;

        let big = entry("b", json!("x".repeat(64)));
        match cache.put(big.key(), &big).await {
            Err(BackendError::QuotaExceeded { limit_bytes, .. }) => assert_eq!(limit_bytes, 40),
            other => panic!("expected quota error, got {other:?}"),
        }

        assert!(cache.get(big.key()).await?.is_none());
        assert!(cache.get(small.key()).await?.is_some());
        assert_eq!(cache.usage().await?.bytes, small.size_hint());
        Ok(())
    }

    #[tokio::test]
    async fn test_evict_drops_oldest() -> BackendResult<()> {
        let cache = RequestCache::new(None);
        let now = Utc::now();
        let old = CachedEntry::with_timestamp(
            "old",
            json!(1),
            Origin::Network,
            now - Duration::seconds(10),
        );
        let new = CachedEntry::with_timestamp("new", json!(2), Origin::Network, now);
        cache.put(old.key(), &old).await?;
        cache.put(new.key(), &new).await?;

        let freed = cache.evict(1).await?;
        assert_eq!(freed, old.size_hint());
        assert!(cache.get(old.key()).await?.is_none());
        assert!(cache.get(new.key()).await?.is_some());

        cache.clear().await?;
        assert!(cache.get(new.key()).await?.is_none());
        Ok(())
    }
}
