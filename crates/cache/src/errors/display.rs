//! Display implementations for cache errors

use super::types::{BackendError, CacheError, ErrorKind};
use std::fmt;

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QuotaExceeded {
                backend,
                requested_bytes,
                limit_bytes,
                ..
            } => write!(
                f,
                "Quota exceeded in backend '{backend}': {requested_bytes} bytes requested, limit is {limit_bytes} bytes"
            ),
            Self::Io {
                backend,
                path,
                operation,
                source,
                ..
            } => write!(
                f,
                "I/O error in backend '{}' during {} on '{}': {}",
                backend,
                operation,
                path.display(),
                source
            ),
            Self::Corruption {
                backend,
                key,
                reason,
                ..
            } => write!(
                f,
                "Corrupted record for key '{key}' in backend '{backend}': {reason}"
            ),
            Self::Serialization {
                backend,
                key,
                operation,
                source,
                ..
            } => write!(
                f,
                "Failed to {operation:?} entry '{key}' in backend '{backend}': {source}"
            ),
            Self::Unavailable {
                backend, reason, ..
            } => write!(f, "Backend '{backend}' unavailable: {reason}"),
        }
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Serialization { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OriginUnavailable { key, source, .. } => write!(
                f,
                "Origin unavailable for '{key}' after all backends missed: {source}"
            ),
            Self::Backend {
                backend,
                operation,
                source,
            } => write!(f, "Backend '{backend}' failed during {operation}: {source}"),
            Self::NotFound { key, backend, .. } => {
                write!(f, "Key '{key}' not found in backend '{backend}'")
            }
            Self::UnknownBackend { backend, .. } => {
                write!(f, "Backend '{backend}' is not available")
            }
            Self::Configuration { message, .. } => {
                write!(f, "Cache configuration error: {message}")
            }
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::OriginUnavailable { source, .. } => Some(source.as_ref()),
            Self::Backend { source, .. } => Some(source),
            Self::NotFound { .. } | Self::UnknownBackend { .. } | Self::Configuration { .. } => {
                None
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not_found",
            Self::QuotaExceeded => "quota_exceeded",
            Self::Backend => "backend",
        };
        f.write_str(name)
    }
}
