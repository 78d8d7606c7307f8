//! Core error types for the cache system

use crate::policy::Operation;
use std::path::PathBuf;
use std::time::Duration;

/// Result type for coordinator operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Result type for a single backend adapter operation
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Error reported by one storage backend
///
/// A miss is never an error: adapters return `Ok(None)` for absent keys.
#[derive(Debug)]
pub enum BackendError {
    /// Writing would push the backend past its size limit
    QuotaExceeded {
        backend: String,
        requested_bytes: u64,
        limit_bytes: u64,
        recovery_hint: RecoveryHint,
    },

    /// I/O errors against the physical store
    Io {
        backend: String,
        path: PathBuf,
        operation: &'static str,
        source: std::io::Error,
        recovery_hint: RecoveryHint,
    },

    /// A stored record could not be trusted
    Corruption {
        backend: String,
        key: String,
        reason: String,
        recovery_hint: RecoveryHint,
    },

    /// Serialization/deserialization errors
    Serialization {
        backend: String,
        key: String,
        operation: SerializationOp,
        source: Box<dyn std::error::Error + Send + Sync>,
        recovery_hint: RecoveryHint,
    },

    /// The store could not be opened or its connection is gone
    Unavailable {
        backend: String,
        reason: String,
        recovery_hint: RecoveryHint,
    },
}

/// Terminal error surfaced to callers of the coordinator
#[derive(Debug)]
pub enum CacheError {
    /// Every backend missed and the origin fetch failed
    OriginUnavailable {
        key: String,
        source: Box<dyn std::error::Error + Send + Sync>,
        recovery_hint: RecoveryHint,
    },

    /// A backend failure the failure policy classified as `Abort`
    Backend {
        backend: String,
        operation: Operation,
        source: BackendError,
    },

    /// A failure policy chose to abort on a plain miss
    NotFound {
        key: String,
        backend: String,
        recovery_hint: RecoveryHint,
    },

    /// The named backend is not registered or did not pass the probe
    UnknownBackend {
        backend: String,
        recovery_hint: RecoveryHint,
    },

    /// Configuration error
    Configuration {
        message: String,
        recovery_hint: RecoveryHint,
    },
}

/// Classification the failure policy decides on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Expected absence of a key
    NotFound,
    /// Size limit hit; a subtype of backend error
    QuotaExceeded,
    /// Any other mechanism failure
    Backend,
}

/// Recovery hints for error handling
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryHint {
    /// Retry the operation
    Retry { after: Duration },

    /// Evict entries from the backend, then retry
    RunEviction,

    /// Try the next backend in the chain
    UseFallback,

    /// Check file permissions
    CheckPermissions { path: PathBuf },

    /// Clear the backend and retry
    ClearAndRetry,

    /// Verify connectivity to the origin
    CheckNetwork,

    /// Update cache configuration
    UpdateConfiguration,

    /// No recovery possible
    NoRecovery,
}

/// Serialization operation types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializationOp {
    Encode,
    Decode,
}
