//! Coordinator construction

use super::stats::CoordinatorStats;
use super::{Coordinator, CoordinatorInner};
use crate::backends::{
    BackendAdapter, BackendKind, KeyValueStore, RequestCache, StructuredStore,
};
use crate::config::CacheConfig;
use crate::errors::Result;
use crate::policy::{DefaultPolicy, FailurePolicy};
use crate::probe::{CapabilityProbe, Registration};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Collects backend registrations and a failure policy, then probes the
/// environment once in [`build`](Self::build)
pub struct CoordinatorBuilder {
    registrations: Vec<Registration>,
    policy: Option<Box<dyn FailurePolicy>>,
    disabled: Option<HashSet<String>>,
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            registrations: Vec::new(),
            policy: None,
            disabled: None,
        }
    }

    /// Register the three built-in backends as described by `config`
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = Self::new();
        for backend in &config.backends {
            let adapter: Arc<dyn BackendAdapter> = match backend.kind {
                BackendKind::RequestCache => Arc::new(RequestCache::new(backend.size_limit_bytes)),
                BackendKind::KeyValue => Arc::new(KeyValueStore::new(
                    config.key_value_path(),
                    backend.size_limit_bytes,
                )),
                BackendKind::Structured => Arc::new(StructuredStore::new(
                    config.structured_root(),
                    backend.size_limit_bytes,
                )),
            };
            builder.registrations.push(Registration {
                adapter,
                priority: backend.priority,
                enabled: backend.enabled,
            });
        }

        tracing::debug!(
            base_dir = %config.base_dir.display(),
            source = ?config.source,
            backends = config.backends.len(),
            "coordinator configured"
        );
        Ok(builder)
    }

    /// Register a backend. Lower priorities are tried first; equal
    /// priorities keep registration order.
    pub fn register<A>(self, adapter: A, priority: i32) -> Self
    where
        A: BackendAdapter + 'static,
    {
        self.register_shared(Arc::new(adapter), priority)
    }

    /// Register a backend the caller keeps a handle to
    pub fn register_shared(mut self, adapter: Arc<dyn BackendAdapter>, priority: i32) -> Self {
        self.registrations.push(Registration {
            adapter,
            priority,
            enabled: true,
        });
        self
    }

    /// Replace the default failure policy
    pub fn policy<P>(mut self, policy: P) -> Self
    where
        P: FailurePolicy + 'static,
    {
        self.policy = Some(Box::new(policy));
        self
    }

    /// Treat the named backends as unavailable instead of reading
    /// `FAILOVER_CACHE_DISABLE`
    pub fn disabled_backends<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Run the capability probe and freeze the backend list
    pub async fn build(self) -> Coordinator {
        let probe = match self.disabled {
            Some(disabled) => CapabilityProbe::with_disabled(self.registrations, disabled),
            None => CapabilityProbe::new(self.registrations),
        };
        let report = probe.probe().await;

        if report.available.is_empty() {
            tracing::warn!("no cache backend available; every fetch will go to the origin");
        }

        let policy = self
            .policy
            .unwrap_or_else(|| Box::new(DefaultPolicy));

        Coordinator {
            inner: Arc::new(CoordinatorInner {
                stats: CoordinatorStats::new(report.available.len()),
                backends: report.available,
                unavailable: report.unavailable,
                policy,
                promotions: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Coordinator {
    /// Build a coordinator over the built-in backends with the default
    /// failure policy
    pub async fn from_config(config: &CacheConfig) -> Result<Self> {
        Ok(CoordinatorBuilder::from_config(config)?.build().await)
    }
}
