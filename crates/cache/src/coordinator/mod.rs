//! Cache coordinator
//!
//! Orchestrates reads across the prioritized backends, promotes hits into
//! the higher-priority backends that missed, populates every backend after
//! an origin fetch and fans invalidation and clearing out to all of them.
//!
//! Per fetch the coordinator moves through
//! `Idle -> Probing(backend[i]) -> {Hit, Miss, Error} -> next | origin -> Settled`.
//! Concurrent fetches of the same key are not coalesced, and promotion
//! writes race freely with `invalidate`/`clear_all`.

mod builder;
mod bulk;
mod fetch;
mod promotion;
mod stats;
mod warm;

pub use builder::CoordinatorBuilder;
pub use bulk::BulkReport;
pub use fetch::Fetched;
pub use stats::{BackendStats, StatsSnapshot};
pub use warm::WarmReport;

use crate::backends::{BackendDescriptor, BackendKind, BackendUsage};
use crate::policy::{Decision, FailureContext, FailurePolicy, FailureRecord};
use crate::probe::ProbedBackend;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;

use stats::CoordinatorStats;

/// Entry point for every cache operation
#[derive(Clone)]
pub struct Coordinator {
    pub(crate) inner: Arc<CoordinatorInner>,
}

pub(crate) struct CoordinatorInner {
    /// Available backends, fixed for the coordinator's lifetime
    pub backends: Vec<ProbedBackend>,
    pub unavailable: Vec<BackendDescriptor>,
    pub policy: Box<dyn FailurePolicy>,
    pub stats: CoordinatorStats,
    /// Outstanding fire-and-forget promotion tasks
    pub promotions: Mutex<Vec<JoinHandle<()>>>,
}

impl CoordinatorInner {
    fn is_last(&self, index: usize) -> bool {
        index + 1 >= self.backends.len()
    }

    fn decide(&self, record: &FailureRecord, index: usize) -> Decision {
        self.policy.decide(&FailureContext {
            record,
            is_last: self.is_last(index),
        })
    }
}

impl Coordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    /// Descriptors of the available backends in the order they are tried
    pub fn descriptors(&self) -> Vec<BackendDescriptor> {
        self.inner
            .backends
            .iter()
            .map(|b| b.descriptor.clone())
            .collect()
    }

    /// Descriptors of backends the capability probe left out
    pub fn unavailable(&self) -> &[BackendDescriptor] {
        &self.inner.unavailable
    }

    pub fn is_available(&self, kind: BackendKind) -> bool {
        self.inner
            .backends
            .iter()
            .any(|b| b.descriptor.kind == kind)
    }

    /// Current footprint of every available backend; `None` when the
    /// backend could not report it
    pub async fn usage(&self) -> Vec<(String, Option<BackendUsage>)> {
        let mut out = Vec::with_capacity(self.inner.backends.len());
        for backend in &self.inner.backends {
            let usage = match backend.adapter.usage().await {
                Ok(usage) => Some(usage),
                Err(e) => {
                    tracing::warn!(backend = %backend.descriptor.name, error = %e, "usage unavailable");
                    None
                }
            };
            out.push((backend.descriptor.name.clone(), usage));
        }
        out
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot(&self.inner.backends)
    }

    fn backend_index(&self, name: &str) -> Option<usize> {
        self.inner
            .backends
            .iter()
            .position(|b| b.descriptor.name == name)
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field(
                "backends",
                &self
                    .inner
                    .backends
                    .iter()
                    .map(|b| b.descriptor.name.as_str())
                    .collect::<Vec<_>>(),
            )
            .field("unavailable", &self.inner.unavailable.len())
            .finish()
    }
}
