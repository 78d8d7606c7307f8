//! Recovery utilities for cache errors

use super::types::{BackendError, CacheError, ErrorKind, RecoveryHint};

impl BackendError {
    /// Get the recovery hint for this error
    #[must_use]
    pub const fn recovery_hint(&self) -> &RecoveryHint {
        match self {
            Self::QuotaExceeded { recovery_hint, .. }
            | Self::Io { recovery_hint, .. }
            | Self::Corruption { recovery_hint, .. }
            | Self::Serialization { recovery_hint, .. }
            | Self::Unavailable { recovery_hint, .. } => recovery_hint,
        }
    }

    /// Name of the backend that produced this error
    #[must_use]
    pub fn backend(&self) -> &str {
        match self {
            Self::QuotaExceeded { backend, .. }
            | Self::Io { backend, .. }
            | Self::Corruption { backend, .. }
            | Self::Serialization { backend, .. }
            | Self::Unavailable { backend, .. } => backend,
        }
    }

    /// Classification used by the failure policy
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            _ => ErrorKind::Backend,
        }
    }

    /// Check if this error is transient and can be retried
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.recovery_hint(), RecoveryHint::Retry { .. })
    }

    /// Check if this error indicates data corruption
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption { .. })
    }
}

impl CacheError {
    /// Get the recovery hint for this error
    #[must_use]
    pub const fn recovery_hint(&self) -> &RecoveryHint {
        match self {
            Self::OriginUnavailable { recovery_hint, .. }
            | Self::NotFound { recovery_hint, .. }
            | Self::UnknownBackend { recovery_hint, .. }
            | Self::Configuration { recovery_hint, .. } => recovery_hint,
            Self::Backend { source, .. } => source.recovery_hint(),
        }
    }

    /// Check if this error is transient and can be retried
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::OriginUnavailable { .. } => true,
            Self::Backend { source, .. } => source.is_transient(),
            Self::NotFound { .. } | Self::UnknownBackend { .. } | Self::Configuration { .. } => {
                false
            }
        }
    }

    /// Classification of the underlying backend failure, if any
    #[must_use]
    pub const fn backend_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Backend { source, .. } => Some(source.kind()),
            Self::NotFound { .. } => Some(ErrorKind::NotFound),
            _ => None,
        }
    }
}
