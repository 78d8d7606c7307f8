//! Failure policy
//!
//! The coordinator never decides on its own what a backend failure means.
//! Every miss or error is turned into a [`FailureRecord`] and handed to a
//! [`FailurePolicy`], which answers with a [`Decision`].

use crate::errors::{BackendError, ErrorKind};
use std::fmt;

/// Backend operation a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Put,
    Delete,
    Clear,
    Evict,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "get",
            Self::Put => "put",
            Self::Delete => "delete",
            Self::Clear => "clear",
            Self::Evict => "evict",
        };
        f.write_str(name)
    }
}

/// Transient description of one failed backend operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub backend: String,
    pub operation: Operation,
    pub kind: ErrorKind,
    pub message: String,
}

impl FailureRecord {
    /// Record for a key that was simply absent
    pub fn miss(backend: &str) -> Self {
        Self {
            backend: backend.to_string(),
            operation: Operation::Get,
            kind: ErrorKind::NotFound,
            message: "not found".to_string(),
        }
    }

    pub fn from_error(operation: Operation, error: &BackendError) -> Self {
        Self {
            backend: error.backend().to_string(),
            operation,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}): {}",
            self.backend, self.operation, self.kind, self.message
        )
    }
}

/// What the coordinator should do after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Move on to the next backend
    Continue,
    /// Stop and surface the failure to the caller
    Abort,
    /// Ask the backend to evict, then retry the write once
    EvictAndRetry,
}

/// Everything a policy gets to look at
#[derive(Debug, Clone, Copy)]
pub struct FailureContext<'a> {
    pub record: &'a FailureRecord,
    /// No backend is left to fall back to after this one
    pub is_last: bool,
}

/// Decides how a backend failure affects the surrounding operation
pub trait FailurePolicy: Send + Sync {
    fn decide(&self, ctx: &FailureContext<'_>) -> Decision;
}

impl<F> FailurePolicy for F
where
    F: Fn(&FailureContext<'_>) -> Decision + Send + Sync,
{
    fn decide(&self, ctx: &FailureContext<'_>) -> Decision {
        self(ctx)
    }
}

/// Fall through to the next backend while one exists
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPolicy;

impl FailurePolicy for DefaultPolicy {
    fn decide(&self, ctx: &FailureContext<'_>) -> Decision {
        match ctx.record.kind {
            ErrorKind::NotFound => Decision::Continue,
            ErrorKind::QuotaExceeded | ErrorKind::Backend => {
                if ctx.is_last {
                    Decision::Abort
                } else {
                    Decision::Continue
                }
            }
        }
    }
}

/// Surface the first real failure, useful when the caller needs to know
/// exactly which backend is broken
#[derive(Debug, Clone, Copy, Default)]
pub struct FailFastPolicy;

impl FailurePolicy for FailFastPolicy {
    fn decide(&self, ctx: &FailureContext<'_>) -> Decision {
        match ctx.record.kind {
            ErrorKind::NotFound => Decision::Continue,
            ErrorKind::QuotaExceeded | ErrorKind::Backend => Decision::Abort,
        }
    }
}

/// Like [`DefaultPolicy`], but a full backend is asked to make room before
/// giving up on a write
#[derive(Debug, Clone, Copy, Default)]
pub struct EvictingPolicy;

impl FailurePolicy for EvictingPolicy {
    fn decide(&self, ctx: &FailureContext<'_>) -> Decision {
        match (ctx.record.kind, ctx.record.operation) {
            (ErrorKind::QuotaExceeded, Operation::Put) => Decision::EvictAndRetry,
            _ => DefaultPolicy.decide(ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(kind: ErrorKind, operation: Operation) -> FailureRecord {
        FailureRecord {
            backend: "localStorage".to_string(),
            operation,
            kind,
            message: String::new(),
        }
    }

    fn kind_strategy() -> impl Strategy<Value = ErrorKind> {
        prop_oneof![
            Just(ErrorKind::NotFound),
            Just(ErrorKind::QuotaExceeded),
            Just(ErrorKind::Backend),
        ]
    }

    #[test]
    fn test_default_policy_table() {
        let miss = record(ErrorKind::NotFound, Operation::Get);
        let quota = record(ErrorKind::QuotaExceeded, Operation::Put);
        let broken = record(ErrorKind::Backend, Operation::Get);

        let decide = |r: &FailureRecord, is_last| {
            DefaultPolicy.decide(&FailureContext { record: r, is_last })
        };

        assert_eq!(decide(&miss, false), Decision::Continue);
        assert_eq!(decide(&miss, true), Decision::Continue);
        assert_eq!(decide(&quota, false), Decision::Continue);
        assert_eq!(decide(&quota, true), Decision::Abort);
        assert_eq!(decide(&broken, false), Decision::Continue);
        assert_eq!(decide(&broken, true), Decision::Abort);
    }

    #[test]
    fn test_evicting_policy_only_evicts_on_put() {
        let put = record(ErrorKind::QuotaExceeded, Operation::Put);
        let get = record(ErrorKind::QuotaExceeded, Operation::Get);

        assert_eq!(
            EvictingPolicy.decide(&FailureContext {
                record: &put,
                is_last: true
            }),
            Decision::EvictAndRetry
        );
        assert_eq!(
            EvictingPolicy.decide(&FailureContext {
                record: &get,
                is_last: false
            }),
            Decision::Continue
        );
    }

    #[test]
    fn test_function_policy() {
        fn always_abort(_: &FailureContext<'_>) -> Decision {
            Decision::Abort
        }

        let miss = record(ErrorKind::NotFound, Operation::Get);
        assert_eq!(
            always_abort.decide(&FailureContext {
                record: &miss,
                is_last: false
            }),
            Decision::Abort
        );
    }

    proptest! {
        #[test]
        fn prop_misses_never_abort(is_last in any::<bool>()) {
            let miss = record(ErrorKind::NotFound, Operation::Get);
            let ctx = FailureContext { record: &miss, is_last };
            prop_assert_eq!(DefaultPolicy.decide(&ctx), Decision::Continue);
            prop_assert_eq!(FailFastPolicy.decide(&ctx), Decision::Continue);
        }

        #[test]
        fn prop_default_aborts_only_on_last(kind in kind_strategy(), is_last in any::<bool>()) {
            let r = record(kind, Operation::Get);
            let decision = DefaultPolicy.decide(&FailureContext { record: &r, is_last });
            if decision == Decision::Abort {
                prop_assert!(is_last);
                prop_assert_ne!(kind, ErrorKind::NotFound);
            }
        }
    }
}
