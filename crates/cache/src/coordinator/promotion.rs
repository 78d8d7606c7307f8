//! Background promotion of hits into faster backends

use super::fetch::WriteOutcome;
use super::stats::CoordinatorStats;
use super::Coordinator;
use crate::entry::CachedEntry;
use futures::future::join_all;
use std::sync::Arc;

impl Coordinator {
    /// Copy `entry` into the backends at `targets` without blocking the
    /// caller. Failures are logged and counted, never surfaced.
    pub(crate) fn promote(&self, entry: &CachedEntry, targets: Vec<usize>) {
        if targets.is_empty() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let entry = entry.clone();
        let handle = tokio::spawn(async move {
            let writes = targets.iter().map(|&index| inner.write_entry(index, &entry));
            let outcomes = join_all(writes).await;

            for (index, outcome) in targets.iter().zip(outcomes) {
                let name = &inner.backends[*index].descriptor.name;
                match outcome {
                    WriteOutcome::Stored => {
                        CoordinatorStats::increment(&inner.stats.promotions);
                        tracing::debug!(backend = %name, key = %entry.key(), "promoted entry");
                    }
                    WriteOutcome::Failed { error, .. } => {
                        CoordinatorStats::increment(&inner.stats.promotion_failures);
                        tracing::warn!(
                            backend = %name,
                            key = %entry.key(),
                            error = %error,
                            "promotion failed"
                        );
                    }
                }
            }
        });

        let mut pending = self.inner.promotions.lock();
        pending.retain(|handle| !handle.is_finished());
        pending.push(handle);
    }

    /// Wait for every promotion spawned so far to settle
    pub async fn flush_promotions(&self) {
        let handles = std::mem::take(&mut *self.inner.promotions.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "promotion task did not complete");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::backends::{BackendAdapter, RequestCache};
    use crate::entry::{CachedEntry, Origin, ResourceKey};
    use crate::Coordinator;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_hit_is_promoted_into_missed_backends() {
        let fast = Arc::new(RequestCache::named("fast", None));
        let slow = Arc::new(RequestCache::named("slow", None));
        let key = ResourceKey::from("clients");
        slow.put(&key, &CachedEntry::new(key.clone(), json!("v1"), Origin::Network))
            .await
            .unwrap();

        let coordinator = Coordinator::builder()
            .register_shared(fast.clone(), 0)
            .register_shared(slow.clone(), 1)
            .disabled_backends(Vec::<String>::new())
            .build()
            .await;

        let fetched = coordinator
            .fetch(&key, || async { Err::<serde_json::Value, _>("unused") })
            .await
            .unwrap();
        assert_eq!(fetched.backend.as_deref(), Some("slow"));

        coordinator.flush_promotions().await;
        let promoted = fast.get(&key).await.unwrap().expect("promoted");
        assert_eq!(promoted.value(), &json!("v1"));
        assert_eq!(coordinator.stats().promotions, 1);
    }

    #[tokio::test]
    async fn test_flush_without_promotions() {
        let coordinator = Coordinator::builder()
            .register(RequestCache::new(None), 0)
            .disabled_backends(Vec::<String>::new())
            .build()
            .await;
        coordinator.flush_promotions().await;
        assert_eq!(coordinator.stats().promotions, 0);
    }
}
