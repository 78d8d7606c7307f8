//! Best-effort operations fanned out to every backend

use super::Coordinator;
use crate::entry::ResourceKey;
use crate::errors::BackendResult;
use crate::policy::{FailureRecord, Operation};
use failover_utils::tracing::operation_span;
use futures::future::join_all;
use tracing::Instrument;

/// Outcome of an operation applied to every backend
///
/// Failures never abort the operation; they are collected here and
/// logged once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkReport {
    /// Backends the operation was attempted on
    pub attempted: usize,
    pub warnings: Vec<FailureRecord>,
}

impl BulkReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.attempted - self.warnings.len()
    }

    fn collect(operation: Operation, results: Vec<BackendResult<()>>) -> Self {
        let attempted = results.len();
        let warnings: Vec<_> = results
            .into_iter()
            .filter_map(|result| result.err())
            .map(|error| FailureRecord::from_error(operation, &error))
            .collect();

        if !warnings.is_empty() {
            let failed: Vec<_> = warnings.iter().map(|w| w.backend.as_str()).collect();
            let details: Vec<_> = warnings.iter().map(ToString::to_string).collect();
            tracing::warn!(
                operation = %operation,
                failed = ?failed,
                details = ?details,
                "{} of {} backends failed",
                warnings.len(),
                attempted
            );
        }

        Self {
            attempted,
            warnings,
        }
    }
}

impl std::fmt::Display for BulkReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} backends succeeded", self.succeeded(), self.attempted)?;
        if self.warnings.is_empty() {
            return Ok(());
        }
        let failed: Vec<_> = self.warnings.iter().map(|w| w.backend.as_str()).collect();
        write!(f, " (failed: {})", failed.join(", "))
    }
}

impl Coordinator {
    /// Delete `key` from every available backend
    ///
    /// A promotion still in flight may write the key back afterwards.
    pub async fn invalidate(&self, key: impl Into<ResourceKey>) -> BulkReport {
        let key = key.into();
        let span = operation_span("invalidate", key.as_str());

        async {
            let deletes = self
                .inner
                .backends
                .iter()
                .map(|backend| backend.adapter.delete(&key));
            BulkReport::collect(Operation::Delete, join_all(deletes).await)
        }
        .instrument(span)
        .await
    }

    /// Remove every entry from every available backend
    pub async fn clear_all(&self) -> BulkReport {
        let span = operation_span("clear_all", "*");

        async {
            let clears = self
                .inner
                .backends
                .iter()
                .map(|backend| backend.adapter.clear());
            let report = BulkReport::collect(Operation::Clear, join_all(clears).await);
            tracing::info!(
                cleared = report.succeeded(),
                failed = report.warnings.len(),
                "cleared cache backends"
            );
            report
        }
        .instrument(span)
        .await
    }
}
