//! Proactive warming

use super::fetch::BoxError;
use super::Coordinator;
use crate::entry::{Origin, ResourceKey};
use failover_utils::tracing::operation_span;
use serde::Serialize;
use std::future::Future;
use tracing::Instrument;

/// Counts from one [`Coordinator::warm`] run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    /// Keys fetched from the origin and written to the backends
    pub warmed: usize,
    /// Keys some backend already held
    pub already_cached: usize,
    pub failed: usize,
}

impl WarmReport {
    pub fn total(&self) -> usize {
        self.warmed + self.already_cached + self.failed
    }
}

impl Coordinator {
    /// Make sure every key in `keys` is cached, calling `origin` for the
    /// ones no backend holds
    ///
    /// Keys are processed one after another. A failing key is logged and
    /// counted; it never stops the run.
    pub async fn warm<I, K, F, Fut, V, E>(&self, keys: I, origin: F) -> WarmReport
    where
        I: IntoIterator<Item = K>,
        K: Into<ResourceKey>,
        F: Fn(ResourceKey) -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        V: Serialize,
        E: Into<BoxError>,
    {
        let mut report = WarmReport::default();

        for key in keys {
            let key = key.into();
            let span = operation_span("warm", key.as_str());
            let request = key.clone();

            match self
                .fetch_key(key.clone(), || origin(request))
                .instrument(span)
                .await
            {
                Ok(fetched) if fetched.source == Origin::Network => report.warmed += 1,
                Ok(_) => report.already_cached += 1,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "failed to warm key");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            warmed = report.warmed,
            already_cached = report.already_cached,
            failed = report.failed,
            "cache warming finished"
        );
        report
    }
}
