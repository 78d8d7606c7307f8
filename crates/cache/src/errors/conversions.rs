//! Error construction helpers used by the backend adapters

use super::types::{BackendError, RecoveryHint, SerializationOp};
use std::path::Path;
use std::time::Duration;

impl BackendError {
    /// Wrap an I/O error, choosing a recovery hint from its kind
    pub fn io(
        backend: &str,
        path: &Path,
        operation: &'static str,
        source: std::io::Error,
    ) -> Self {
        use std::io::ErrorKind;

        let recovery_hint = match source.kind() {
            ErrorKind::PermissionDenied => RecoveryHint::CheckPermissions {
                path: path.to_path_buf(),
            },
            ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => {
                RecoveryHint::Retry {
                    after: Duration::from_millis(100),
                }
            }
            _ => RecoveryHint::UseFallback,
        };

        Self::Io {
            backend: backend.to_string(),
            path: path.to_path_buf(),
            operation,
            source,
            recovery_hint,
        }
    }

    /// Wrap a serializer error for the given key
    pub fn serialization<E>(backend: &str, key: &str, operation: SerializationOp, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Serialization {
            backend: backend.to_string(),
            key: key.to_string(),
            operation,
            source: Box::new(source),
            recovery_hint: RecoveryHint::ClearAndRetry,
        }
    }

    /// A record failed an integrity check
    pub fn corruption(backend: &str, key: &str, reason: impl Into<String>) -> Self {
        Self::Corruption {
            backend: backend.to_string(),
            key: key.to_string(),
            reason: reason.into(),
            recovery_hint: RecoveryHint::ClearAndRetry,
        }
    }

    /// The backend would exceed its configured size limit
    pub fn quota_exceeded(backend: &str, requested_bytes: u64, limit_bytes: u64) -> Self {
        Self::QuotaExceeded {
            backend: backend.to_string(),
            requested_bytes,
            limit_bytes,
            recovery_hint: RecoveryHint::RunEviction,
        }
    }

    /// The store connection could not be established
    pub fn unavailable(backend: &str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            backend: backend.to_string(),
            reason: reason.into(),
            recovery_hint: RecoveryHint::UseFallback,
        }
    }
}
