//! Shared helpers for the coordinator integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use failover_cache::{
    BackendAdapter, BackendError, BackendKind, BackendResult, BackendUsage, CachedEntry, Origin,
    RequestCache, ResourceKey,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Fault to inject into one kind of operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    None,
    /// Fail with a quota error
    Quota,
    /// Fail with a generic unavailable error
    Broken,
}

/// In-memory backend whose failures are programmable at runtime
pub struct FaultyBackend {
    name: String,
    kind: BackendKind,
    store: RequestCache,
    available: AtomicBool,
    get_fault: Mutex<Fault>,
    put_fault: Mutex<Fault>,
    /// Put failures left before `put_fault` stops applying; `usize::MAX` means forever
    put_failures_left: AtomicUsize,
    delete_fault: Mutex<Fault>,
    clear_fault: Mutex<Fault>,
    /// When set, every put waits for a notification before writing
    put_gate: Mutex<Option<Arc<Notify>>>,
    pub gets: AtomicU64,
    pub puts: AtomicU64,
    pub evictions: AtomicU64,
}

impl FaultyBackend {
    pub fn new(name: &str, kind: BackendKind) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            kind,
            store: RequestCache::named(name, None),
            available: AtomicBool::new(true),
            get_fault: Mutex::new(Fault::None),
            put_fault: Mutex::new(Fault::None),
            put_failures_left: AtomicUsize::new(usize::MAX),
            delete_fault: Mutex::new(Fault::None),
            clear_fault: Mutex::new(Fault::None),
            put_gate: Mutex::new(None),
            gets: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn fail_gets(&self, fault: Fault) {
        *self.get_fault.lock() = fault;
    }

    pub fn fail_puts(&self, fault: Fault) {
        *self.put_fault.lock() = fault;
        self.put_failures_left.store(usize::MAX, Ordering::SeqCst);
    }

    /// Fail only the next `times` puts
    pub fn fail_puts_times(&self, fault: Fault, times: usize) {
        *self.put_fault.lock() = fault;
        self.put_failures_left.store(times, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fault: Fault) {
        *self.delete_fault.lock() = fault;
    }

    pub fn fail_clears(&self, fault: Fault) {
        *self.clear_fault.lock() = fault;
    }

    /// Hold every later put until the returned gate is notified
    pub fn hold_puts(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.put_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Seed a value without going through the coordinator
    pub async fn seed(&self, key: &str, value: Value) {
        let entry = CachedEntry::new(key, value, Origin::Network);
        self.store
            .put(entry.key(), &entry)
            .await
            .expect("seeding an in-memory backend");
    }

    /// Read a value without going through the coordinator or fault injection
    pub async fn peek(&self, key: &str) -> Option<Value> {
        self.store
            .get(&ResourceKey::from(key))
            .await
            .expect("reading an in-memory backend")
            .map(CachedEntry::into_value)
    }

    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }

    fn injected(&self, fault: Fault) -> BackendResult<()> {
        match fault {
            Fault::None => Ok(()),
            Fault::Quota => Err(BackendError::quota_exceeded(&self.name, 1, 0)),
            Fault::Broken => Err(BackendError::unavailable(&self.name, "injected failure")),
        }
    }

    fn put_fault(&self) -> Fault {
        let fault = *self.put_fault.lock();
        if fault == Fault::None {
            return fault;
        }
        let left = self.put_failures_left.load(Ordering::SeqCst);
        if left == usize::MAX {
            return fault;
        }
        if left == 0 {
            return Fault::None;
        }
        self.put_failures_left.store(left - 1, Ordering::SeqCst);
        fault
    }
}

#[async_trait]
impl BackendAdapter for FaultyBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn probe(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn get(&self, key: &ResourceKey) -> BackendResult<Option<CachedEntry>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let fault = *self.get_fault.lock();
        self.injected(fault)?;
        self.store.get(key).await
    }

    async fn put(&self, key: &ResourceKey, entry: &CachedEntry) -> BackendResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let gate = self.put_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.injected(self.put_fault())?;
        self.store.put(key, entry).await
    }

    async fn delete(&self, key: &ResourceKey) -> BackendResult<()> {
        let fault = *self.delete_fault.lock();
        self.injected(fault)?;
        self.store.delete(key).await
    }

    async fn clear(&self) -> BackendResult<()> {
        let fault = *self.clear_fault.lock();
        self.injected(fault)?;
        self.store.clear().await
    }

    async fn evict(&self, _bytes_needed: u64) -> BackendResult<u64> {
        self.evictions.fetch_add(1, Ordering::SeqCst);
        Ok(1)
    }

    async fn usage(&self) -> BackendResult<BackendUsage> {
        self.store.usage().await
    }
}

/// Origin fetch stand-in that counts its calls
#[derive(Clone, Default)]
pub struct CountingOrigin {
    calls: Arc<AtomicU64>,
}

impl CountingOrigin {
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns a closure usable as an origin fetch that yields `value`
    pub fn serving(
        &self,
        value: Value,
    ) -> impl FnOnce() -> std::future::Ready<Result<Value, std::io::Error>> {
        let calls = Arc::clone(&self.calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(value))
        }
    }

    /// Returns a closure usable as an origin fetch that always fails
    pub fn failing(&self) -> impl FnOnce() -> std::future::Ready<Result<Value, std::io::Error>> {
        let calls = Arc::clone(&self.calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "origin unreachable",
            )))
        }
    }
}
