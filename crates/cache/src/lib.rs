//! Prioritized fallback cache over heterogeneous local storage
//!
//! This crate puts several storage mechanisms behind one interface:
//! - An ephemeral in-process request cache
//! - A quota-limited key-value store persisted as a JSON snapshot
//! - A versioned, checksummed structured record store
//!
//! The [`Coordinator`] tries the available backends in priority order,
//! promotes hits into faster backends, falls back to a caller-supplied
//! origin fetch when every backend misses, and lets a pluggable
//! [`FailurePolicy`] decide what a backend failure means.

pub mod backends;
pub mod config;
pub mod coordinator;
pub mod entry;
pub mod errors;
pub mod policy;
pub mod probe;

pub use backends::{
    BackendAdapter, BackendDescriptor, BackendKind, BackendUsage, KeyValueStore, RequestCache,
    StructuredStore,
};
pub use config::{BackendConfig, CacheConfig, CacheConfigBuilder, CacheConfigLoader, ConfigSource};
pub use coordinator::{
    BackendStats, BulkReport, Coordinator, CoordinatorBuilder, Fetched, StatsSnapshot, WarmReport,
};
pub use entry::{CachedEntry, Origin, ResourceKey};
pub use errors::{BackendError, BackendResult, CacheError, ErrorKind, RecoveryHint, Result};
pub use policy::{
    DefaultPolicy, Decision, EvictingPolicy, FailFastPolicy, FailureContext, FailurePolicy,
    FailureRecord, Operation,
};
pub use probe::{CapabilityProbe, ProbeReport, ProbedBackend, Registration};
