//! Capability probe
//!
//! Runs once when a coordinator is built and decides which registered
//! backends are usable in this environment. Being reported available only
//! means the mechanism exists; individual operations can still fail later.

use crate::backends::{BackendAdapter, BackendDescriptor};
use crate::config::ENV_DISABLE;
use std::collections::HashSet;
use std::sync::Arc;

/// A backend registration waiting to be probed
pub struct Registration {
    pub adapter: Arc<dyn BackendAdapter>,
    pub priority: i32,
    pub enabled: bool,
}

/// An available backend with its descriptor
#[derive(Clone)]
pub struct ProbedBackend {
    pub descriptor: BackendDescriptor,
    pub adapter: Arc<dyn BackendAdapter>,
}

impl std::fmt::Debug for ProbedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbedBackend")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// Outcome of probing every registration
#[derive(Debug, Default)]
pub struct ProbeReport {
    /// Usable backends in ascending priority, registration order on ties
    pub available: Vec<ProbedBackend>,
    /// Backends left out, in registration order
    pub unavailable: Vec<BackendDescriptor>,
}

/// Inspects the environment to find usable backends
pub struct CapabilityProbe {
    registrations: Vec<Registration>,
    disabled: HashSet<String>,
}

impl CapabilityProbe {
    /// Probe honouring `FAILOVER_CACHE_DISABLE`
    pub fn new(registrations: Vec<Registration>) -> Self {
        let disabled = std::env::var(ENV_DISABLE)
            .map(|value| parse_disabled(&value))
            .unwrap_or_default();
        Self::with_disabled(registrations, disabled)
    }

    /// Probe with an explicit set of backend names to treat as missing
    pub fn with_disabled(registrations: Vec<Registration>, disabled: HashSet<String>) -> Self {
        Self {
            registrations,
            disabled,
        }
    }

    /// Check every registration once. Never fails: anything unusable is
    /// simply left out of `available`.
    pub async fn probe(self) -> ProbeReport {
        let mut report = ProbeReport::default();

        for (registration, reg) in self.registrations.into_iter().enumerate() {
            let name = reg.adapter.name().to_string();
            let available = if !reg.enabled {
                tracing::info!(backend = %name, "backend disabled by configuration");
                false
            } else if self.disabled.contains(&name) {
                tracing::info!(backend = %name, env = ENV_DISABLE, "backend disabled by environment");
                false
            } else if !reg.adapter.probe().await {
                tracing::info!(backend = %name, "backend unavailable in this environment");
                false
            } else {
                true
            };

            let descriptor = BackendDescriptor {
                name,
                kind: reg.adapter.kind(),
                available,
                priority: reg.priority,
                size_limit_bytes: reg.adapter.size_limit_bytes(),
                registration,
            };

            if available {
                report.available.push(ProbedBackend {
                    descriptor,
                    adapter: reg.adapter,
                });
            } else {
                report.unavailable.push(descriptor);
            }
        }

        // Stable sort keeps registration order for equal priorities
        report
            .available
            .sort_by_key(|backend| backend.descriptor.priority);

        tracing::debug!(
            available = ?report
                .available
                .iter()
                .map(|b| b.descriptor.name.as_str())
                .collect::<Vec<_>>(),
            unavailable = report.unavailable.len(),
            "capability probe finished"
        );
        report
    }
}

fn parse_disabled(value: &str) -> HashSet<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{KeyValueStore, RequestCache};
    use proptest::prelude::*;
    use serial_test::serial;

    fn registration(name: &str, priority: i32) -> Registration {
        Registration {
            adapter: Arc::new(RequestCache::named(name, None)),
            priority,
            enabled: true,
        }
    }

    #[test]
    fn test_parse_disabled() {
        let names = parse_disabled(" cache, ,indexedDb ");
        assert_eq!(names.len(), 2);
        assert!(names.contains("cache"));
        assert!(names.contains("indexedDb"));
    }

    #[tokio::test]
    async fn test_unavailable_are_omitted() {
        let mut disabled_by_config = registration("disabled", 0);
        disabled_by_config.enabled = false;

        let registrations = vec![
            disabled_by_config,
            registration("env-disabled", 1),
            registration("ok", 2),
            Registration {
                // No parent directory: structurally unusable
                adapter: Arc::new(KeyValueStore::new("/", None)),
                priority: 3,
                enabled: true,
            },
        ];
        let disabled = HashSet::from(["env-disabled".to_string()]);

        let report = CapabilityProbe::with_disabled(registrations, disabled)
            .probe()
            .await;

        let available: Vec<_> = report
            .available
            .iter()
            .map(|b| b.descriptor.name.as_str())
            .collect();
        assert_eq!(available, vec!["ok"]);
        assert!(report.available[0].descriptor.available);

        let unavailable: Vec<_> = report.unavailable.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(unavailable, vec!["disabled", "env-disabled", "localStorage"]);
        assert!(report.unavailable.iter().all(|d| !d.available));
    }

    #[tokio::test]
    #[serial]
    async fn test_env_disable() {
        std::env::set_var(ENV_DISABLE, "cache");
        let report = CapabilityProbe::new(vec![registration("cache", 0), registration("other", 1)])
            .probe()
            .await;
        std::env::remove_var(ENV_DISABLE);

        assert_eq!(report.available.len(), 1);
        assert_eq!(report.available[0].descriptor.name, "other");
        assert_eq!(report.unavailable[0].name, "cache");
    }

    proptest! {
        #[test]
        fn prop_order_is_priority_then_registration(priorities in prop::collection::vec(-3i32..3, 1..8)) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let registrations = priorities
                .iter()
                .enumerate()
                .map(|(i, p)| registration(&format!("b{i}"), *p))
                .collect();

            let report = runtime.block_on(
                CapabilityProbe::with_disabled(registrations, HashSet::new()).probe(),
            );

            prop_assert_eq!(report.available.len(), priorities.len());
            for pair in report.available.windows(2) {
                let (a, b) = (&pair[0].descriptor, &pair[1].descriptor);
                prop_assert!(
                    a.priority < b.priority
                        || (a.priority == b.priority && a.registration < b.registration)
                );
            }
        }
    }
}
