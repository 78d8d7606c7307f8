//! Read path: walk the backends in order, fall back to the origin

use super::stats::CoordinatorStats;
use super::{Coordinator, CoordinatorInner};
use crate::entry::{CachedEntry, Origin, ResourceKey};
use crate::errors::{BackendError, CacheError, RecoveryHint, Result, SerializationOp};
use crate::policy::{Decision, FailureRecord, Operation};
use failover_utils::tracing::{cache_event, operation_span};
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use tracing::Instrument;

/// Error type accepted from origin fetches
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A successfully fetched entry and where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub entry: CachedEntry,
    /// Origin tag of the backend that answered, or `network`
    pub source: Origin,
    /// Name of the backend that served the hit, `None` for origin fetches
    pub backend: Option<String>,
}

impl Fetched {
    pub fn is_hit(&self) -> bool {
        self.backend.is_some()
    }

    pub fn value(&self) -> &serde_json::Value {
        self.entry.value()
    }

    pub fn into_value(self) -> serde_json::Value {
        self.entry.into_value()
    }
}

pub(crate) enum Lookup {
    Hit {
        index: usize,
        entry: CachedEntry,
        /// Higher-priority backends that missed or failed and were skipped
        missed: Vec<usize>,
    },
    Miss,
}

pub(crate) enum WriteOutcome {
    Stored,
    Failed {
        error: BackendError,
        decision: Decision,
    },
}

impl CoordinatorInner {
    /// Walk the available backends in priority order until one holds `key`
    pub(crate) async fn lookup(&self, key: &ResourceKey) -> Result<Lookup> {
        let mut missed = Vec::new();

        for (index, backend) in self.backends.iter().enumerate() {
            let name = backend.descriptor.name.as_str();

            let record = match backend.adapter.get(key).await {
                Ok(Some(entry)) => {
                    cache_event(name, key.as_str(), true);
                    self.stats.record_hit(index);
                    return Ok(Lookup::Hit {
                        index,
                        entry,
                        missed,
                    });
                }
                Ok(None) => {
                    cache_event(name, key.as_str(), false);
                    self.stats.record_miss(index);
                    let record = FailureRecord::miss(name);
                    match self.decide(&record, index) {
                        Decision::Abort => {
                            return Err(CacheError::NotFound {
                                key: key.to_string(),
                                backend: name.to_string(),
                                recovery_hint: RecoveryHint::UseFallback,
                            })
                        }
                        Decision::Continue | Decision::EvictAndRetry => {}
                    }
                    record
                }
                Err(error) => {
                    tracing::warn!(backend = %name, key = %key, error = %error, "backend read failed");
                    self.stats.record_error(index);
                    let record = FailureRecord::from_error(Operation::Get, &error);
                    match self.decide(&record, index) {
                        Decision::Abort => {
                            return Err(CacheError::Backend {
                                backend: name.to_string(),
                                operation: Operation::Get,
                                source: error,
                            })
                        }
                        Decision::Continue | Decision::EvictAndRetry => {}
                    }
                    record
                }
            };

            tracing::trace!(failure = %record, "falling through to next backend");
            missed.push(index);
        }

        Ok(Lookup::Miss)
    }

    /// What to do once an eviction retry is off the table
    fn settle(&self, index: usize) -> Decision {
        if self.is_last(index) {
            Decision::Abort
        } else {
            Decision::Continue
        }
    }

    /// Store `entry` in one backend, consulting the policy on failure and
    /// retrying once after an eviction when it asks for one
    pub(crate) async fn write_entry(&self, index: usize, entry: &CachedEntry) -> WriteOutcome {
        let backend = &self.backends[index];
        let name = backend.descriptor.name.as_str();

        let error = match backend.adapter.put(entry.key(), entry).await {
            Ok(()) => return WriteOutcome::Stored,
            Err(error) => error,
        };
        self.stats.record_error(index);

        let record = FailureRecord::from_error(Operation::Put, &error);
        let decision = self.decide(&record, index);
        if decision != Decision::EvictAndRetry {
            return WriteOutcome::Failed { error, decision };
        }

        let bytes_needed = match &error {
            BackendError::QuotaExceeded {
                requested_bytes, ..
            } => *requested_bytes,
            _ => entry.size_hint(),
        };
        match backend.adapter.evict(bytes_needed).await {
            Ok(0) => {
                tracing::debug!(backend = %name, "nothing to evict");
                return WriteOutcome::Failed {
                    error,
                    decision: self.settle(index),
                };
            }
            Ok(freed) => {
                tracing::debug!(backend = %name, freed_bytes = freed, "evicted before retrying write");
            }
            Err(evict_error) => {
                tracing::warn!(backend = %name, error = %evict_error, "eviction failed");
                return WriteOutcome::Failed {
                    error,
                    decision: self.settle(index),
                };
            }
        }

        match backend.adapter.put(entry.key(), entry).await {
            Ok(()) => WriteOutcome::Stored,
            Err(retry_error) => {
                self.stats.record_error(index);
                let record = FailureRecord::from_error(Operation::Put, &retry_error);
                let decision = match self.decide(&record, index) {
                    Decision::EvictAndRetry => self.settle(index),
                    other => other,
                };
                WriteOutcome::Failed {
                    error: retry_error,
                    decision,
                }
            }
        }
    }

    /// Write a freshly fetched entry into every available backend
    ///
    /// Succeeds when at least one backend stored the entry, or when no
    /// failure was classified as `Abort`.
    pub(crate) async fn populate(&self, entry: &CachedEntry) -> Result<usize> {
        let outcomes = join_all(
            (0..self.backends.len()).map(|index| self.write_entry(index, entry)),
        )
        .await;

        let mut stored = 0usize;
        let mut aborted = None;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                WriteOutcome::Stored => stored += 1,
                WriteOutcome::Failed { error, decision } => {
                    CoordinatorStats::increment(&self.stats.populate_failures);
                    let name = &self.backends[index].descriptor.name;
                    tracing::warn!(
                        backend = %name,
                        key = %entry.key(),
                        decision = ?decision,
                        error = %error,
                        "failed to populate backend"
                    );
                    if decision == Decision::Abort {
                        aborted = Some((name.clone(), error));
                    }
                }
            }
        }

        match aborted {
            Some((backend, source)) if stored == 0 => Err(CacheError::Backend {
                backend,
                operation: Operation::Put,
                source,
            }),
            _ => Ok(stored),
        }
    }
}

impl Coordinator {
    /// Fetch `key`, falling back to `origin_fetch` when every backend misses
    ///
    /// A hit is promoted in the background into every higher-priority
    /// backend that missed. An origin value is written into every available
    /// backend before returning.
    pub async fn fetch<K, F, Fut, V, E>(&self, key: K, origin_fetch: F) -> Result<Fetched>
    where
        K: Into<ResourceKey>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        V: Serialize,
        E: Into<BoxError>,
    {
        let key = key.into();
        let span = operation_span("fetch", key.as_str());
        self.fetch_key(key, origin_fetch).instrument(span).await
    }

    /// Like [`fetch`](Self::fetch), deserializing the value into `T`
    pub async fn fetch_as<T, K, F, Fut, V, E>(&self, key: K, origin_fetch: F) -> Result<T>
    where
        T: DeserializeOwned,
        K: Into<ResourceKey>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        V: Serialize,
        E: Into<BoxError>,
    {
        let fetched = self.fetch(key, origin_fetch).await?;
        match fetched.entry.value_as::<T>() {
            Ok(value) => Ok(value),
            Err(e) => {
                let backend = fetched
                    .backend
                    .unwrap_or_else(|| fetched.source.to_string());
                Err(CacheError::Backend {
                    source: BackendError::serialization(
                        &backend,
                        fetched.entry.key().as_str(),
                        SerializationOp::Decode,
                        e,
                    ),
                    backend,
                    operation: Operation::Get,
                })
            }
        }
    }

    /// Read `key` from one named backend only, filling that backend from
    /// the origin on a miss
    pub async fn fetch_from<K, F, Fut, V, E>(
        &self,
        backend: &str,
        key: K,
        origin_fetch: F,
    ) -> Result<Fetched>
    where
        K: Into<ResourceKey>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        V: Serialize,
        E: Into<BoxError>,
    {
        let key = key.into();
        let Some(index) = self.backend_index(backend) else {
            return Err(CacheError::UnknownBackend {
                backend: backend.to_string(),
                recovery_hint: RecoveryHint::UseFallback,
            });
        };
        let span = operation_span("fetch_from", key.as_str());

        async move {
            let inner = &self.inner;
            let probed = &inner.backends[index];

            match probed.adapter.get(&key).await {
                Ok(Some(entry)) => {
                    cache_event(backend, key.as_str(), true);
                    inner.stats.record_hit(index);
                    return Ok(Fetched {
                        entry,
                        source: probed.descriptor.kind.origin(),
                        backend: Some(probed.descriptor.name.clone()),
                    });
                }
                Ok(None) => {
                    cache_event(backend, key.as_str(), false);
                    inner.stats.record_miss(index);
                }
                Err(error) => {
                    inner.stats.record_error(index);
                    return Err(CacheError::Backend {
                        backend: backend.to_string(),
                        operation: Operation::Get,
                        source: error,
                    });
                }
            }

            let entry = self.fetch_origin(&key, origin_fetch).await?;
            match inner.write_entry(index, &entry).await {
                WriteOutcome::Stored => {}
                WriteOutcome::Failed { error, .. } => {
                    CoordinatorStats::increment(&inner.stats.populate_failures);
                    return Err(CacheError::Backend {
                        backend: backend.to_string(),
                        operation: Operation::Put,
                        source: error,
                    });
                }
            }

            Ok(Fetched {
                entry,
                source: Origin::Network,
                backend: None,
            })
        }
        .instrument(span)
        .await
    }

    pub(crate) async fn fetch_key<F, Fut, V, E>(
        &self,
        key: ResourceKey,
        origin_fetch: F,
    ) -> Result<Fetched>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        V: Serialize,
        E: Into<BoxError>,
    {
        match self.inner.lookup(&key).await? {
            Lookup::Hit {
                index,
                entry,
                missed,
            } => {
                let backend = &self.inner.backends[index].descriptor;
                self.promote(&entry, missed);
                return Ok(Fetched {
                    source: backend.kind.origin(),
                    backend: Some(backend.name.clone()),
                    entry,
                });
            }
            Lookup::Miss => {}
        }

        let entry = self.fetch_origin(&key, origin_fetch).await?;
        let stored = self.inner.populate(&entry).await?;
        tracing::debug!(key = %key, stored, "populated from origin");

        Ok(Fetched {
            entry,
            source: Origin::Network,
            backend: None,
        })
    }

    async fn fetch_origin<F, Fut, V, E>(
        &self,
        key: &ResourceKey,
        origin_fetch: F,
    ) -> Result<CachedEntry>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        V: Serialize,
        E: Into<BoxError>,
    {
        CoordinatorStats::increment(&self.inner.stats.origin_fetches);

        let value = match origin_fetch().await {
            Ok(value) => value,
            Err(e) => {
                CoordinatorStats::increment(&self.inner.stats.origin_failures);
                let source: BoxError = e.into();
                tracing::warn!(key = %key, error = %source, "origin fetch failed");
                return Err(CacheError::OriginUnavailable {
                    key: key.to_string(),
                    source,
                    recovery_hint: RecoveryHint::CheckNetwork,
                });
            }
        };

        match serde_json::to_value(value) {
            Ok(value) => Ok(CachedEntry::new(key.clone(), value, Origin::Network)),
            Err(e) => {
                CoordinatorStats::increment(&self.inner.stats.origin_failures);
                Err(CacheError::OriginUnavailable {
                    key: key.to_string(),
                    source: Box::new(e),
                    recovery_hint: RecoveryHint::NoRecovery,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::RequestCache;
    use crate::policy::FailurePolicy;
    use serde_json::json;
    use std::convert::Infallible;

    async fn coordinator() -> Coordinator {
        Coordinator::builder()
            .register(RequestCache::named("first", None), 0)
            .register(RequestCache::named("second", None), 1)
            .disabled_backends(Vec::<String>::new())
            .build()
            .await
    }

    #[tokio::test]
    async fn test_origin_then_hit() {
        let coordinator = coordinator().await;

        let first = coordinator
            .fetch("clients", || async { Ok::<_, Infallible>(json!(["a"])) })
            .await
            .unwrap();
        assert_eq!(first.source, Origin::Network);
        assert!(!first.is_hit());

        let second = coordinator
            .fetch("clients", || async {
                Err::<serde_json::Value, _>("origin must not be called")
            })
            .await
            .unwrap();
        assert_eq!(second.backend.as_deref(), Some("first"));
        assert_eq!(second.source, Origin::RequestCache);
        assert_eq!(second.value(), &json!(["a"]));
        // Entries keep the provenance they were created with
        assert_eq!(second.entry.origin(), Origin::Network);
    }

    #[tokio::test]
    async fn test_origin_failure() {
        let coordinator = coordinator().await;
        let err = coordinator
            .fetch("clients", || async {
                Err::<serde_json::Value, _>("connection refused")
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::OriginUnavailable { .. }));
        assert_eq!(err.recovery_hint(), &RecoveryHint::CheckNetwork);
        assert_eq!(coordinator.stats().origin_failures, 1);
    }

    #[tokio::test]
    async fn test_fetch_as() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Client {
            id: u32,
        }

        let coordinator = coordinator().await;
        let client: Client = coordinator
            .fetch_as("client/1", || async { Ok::<_, Infallible>(json!({"id": 1})) })
            .await
            .unwrap();
        assert_eq!(client, Client { id: 1 });

        let mismatch = coordinator
            .fetch_as::<Vec<String>, _, _, _, _, _>("client/1", || async {
                Ok::<_, Infallible>(json!(null))
            })
            .await;
        assert!(mismatch.is_err());
    }

    #[tokio::test]
    async fn test_policy_abort_on_miss() {
        fn abort_on_miss(ctx: &crate::policy::FailureContext<'_>) -> Decision {
            match ctx.record.kind {
                crate::errors::ErrorKind::NotFound => Decision::Abort,
                _ => Decision::Continue,
            }
        }
        assert_eq!(
            abort_on_miss.decide(&crate::policy::FailureContext {
                record: &FailureRecord::miss("first"),
                is_last: false,
            }),
            Decision::Abort
        );

        let coordinator = Coordinator::builder()
            .register(RequestCache::named("first", None), 0)
            .policy(abort_on_miss)
            .disabled_backends(Vec::<String>::new())
            .build()
            .await;

        let err = coordinator
            .fetch("clients", || async { Ok::<_, Infallible>(json!(1)) })
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::NotFound { ref backend, .. } if backend == "first"));
        assert_eq!(coordinator.stats().origin_fetches, 0);
    }

    #[tokio::test]
    async fn test_fetch_from_single_backend() {
        let coordinator = coordinator().await;

        let fetched = coordinator
            .fetch_from("second", "clients", || async {
                Ok::<_, Infallible>(json!("v1"))
            })
            .await
            .unwrap();
        assert_eq!(fetched.source, Origin::Network);

        // Only the named backend was filled
        let hit = coordinator
            .fetch("clients", || async { Err::<serde_json::Value, _>("unused") })
            .await
            .unwrap();
        assert_eq!(hit.backend.as_deref(), Some("second"));

        let unknown = coordinator
            .fetch_from("missing", "clients", || async {
                Ok::<_, Infallible>(json!(1))
            })
            .await
            .unwrap_err();
        assert!(matches!(unknown, CacheError::UnknownBackend { .. }));
    }

    #[tokio::test]
    async fn test_no_backends_goes_to_origin_every_time() {
        let coordinator = Coordinator::builder()
            .disabled_backends(Vec::<String>::new())
            .build()
            .await;

        for _ in 0..2 {
            let fetched = coordinator
                .fetch("clients", || async { Ok::<_, Infallible>(json!(1)) })
                .await
                .unwrap();
            assert_eq!(fetched.source, Origin::Network);
        }
        assert_eq!(coordinator.stats().origin_fetches, 2);
    }
}
