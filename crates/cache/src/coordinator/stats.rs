//! Per-coordinator counters

use crate::probe::ProbedBackend;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct BackendCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub errors: AtomicU64,
}

/// Lock-free counters, one set of backend counters per available backend
#[derive(Debug, Default)]
pub(crate) struct CoordinatorStats {
    pub backends: Vec<BackendCounters>,
    pub origin_fetches: AtomicU64,
    pub origin_failures: AtomicU64,
    pub promotions: AtomicU64,
    pub promotion_failures: AtomicU64,
    pub populate_failures: AtomicU64,
}

impl CoordinatorStats {
    pub fn new(backend_count: usize) -> Self {
        Self {
            backends: (0..backend_count)
                .map(|_| BackendCounters::default())
                .collect(),
            ..Self::default()
        }
    }

    pub fn record_hit(&self, index: usize) {
        if let Some(counters) = self.backends.get(index) {
            counters.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_miss(&self, index: usize) {
        if let Some(counters) = self.backends.get(index) {
            counters.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_error(&self, index: usize) {
        if let Some(counters) = self.backends.get(index) {
            counters.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn increment(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, backends: &[ProbedBackend]) -> StatsSnapshot {
        let backends = backends
            .iter()
            .zip(&self.backends)
            .map(|(backend, counters)| BackendStats {
                name: backend.descriptor.name.clone(),
                hits: counters.hits.load(Ordering::Relaxed),
                misses: counters.misses.load(Ordering::Relaxed),
                errors: counters.errors.load(Ordering::Relaxed),
            })
            .collect();

        StatsSnapshot {
            backends,
            origin_fetches: self.origin_fetches.load(Ordering::Relaxed),
            origin_failures: self.origin_failures.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            promotion_failures: self.promotion_failures.load(Ordering::Relaxed),
            populate_failures: self.populate_failures.load(Ordering::Relaxed),
        }
    }
}

/// Counters for one backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendStats {
    pub name: String,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
}

/// Point-in-time copy of the coordinator counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub backends: Vec<BackendStats>,
    pub origin_fetches: u64,
    pub origin_failures: u64,
    pub promotions: u64,
    pub promotion_failures: u64,
    pub populate_failures: u64,
}

impl StatsSnapshot {
    pub fn total_hits(&self) -> u64 {
        self.backends.iter().map(|b| b.hits).sum()
    }

    pub fn backend(&self, name: &str) -> Option<&BackendStats> {
        self.backends.iter().find(|b| b.name == name)
    }

    /// Share of fetches answered without going to the origin
    pub fn hit_rate(&self) -> f64 {
        let hits = self.total_hits();
        let total = hits + self.origin_fetches;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}
