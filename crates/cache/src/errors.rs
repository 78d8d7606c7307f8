//! Error handling for the failover cache
//!
//! Two layers of errors exist. [`BackendError`] is what a single storage
//! adapter reports; the coordinator feeds it through the failure policy and
//! it only reaches callers wrapped in [`CacheError::Backend`] when the policy
//! aborts. [`CacheError`] is the caller-facing terminal error.

mod conversions;
mod display;
mod recovery;
mod types;

pub use types::*;
