//! Process-wide provider guards.
//!
//! Breaker state belongs to the provider, not to a job, so every job calling
//! the same provider shares one [`ProviderGuard`].

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::breaker::CircuitSnapshot;
use crate::guard::{ProviderGuard, ProviderSettings};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderHealth {
    pub name: String,
    pub circuit: CircuitSnapshot,
}

#[derive(Debug)]
pub struct ProviderRegistry {
    defaults: ProviderSettings,
    guards: RwLock<BTreeMap<String, Arc<ProviderGuard>>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new(ProviderSettings::default())
    }
}

impl ProviderRegistry {
    pub fn new(defaults: ProviderSettings) -> Self {
        Self {
            defaults,
            guards: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn defaults(&self) -> &ProviderSettings {
        &self.defaults
    }

    /// Register a provider with explicit settings, replacing any previous guard.
    pub fn register(&self, name: &str, settings: ProviderSettings) -> Arc<ProviderGuard> {
        let guard = Arc::new(ProviderGuard::new(name, settings));
        self.guards
            .write()
            .expect("provider registry lock poisoned")
            .insert(name.to_string(), guard.clone());
        guard
    }

    /// Guard for `name`, created with the default settings on first use.
    pub fn guard(&self, name: &str) -> Arc<ProviderGuard> {
        if let Some(guard) = self
            .guards
            .read()
            .expect("provider registry lock poisoned")
            .get(name)
        {
            return guard.clone();
        }

        let mut guards = self.guards.write().expect("provider registry lock poisoned");
        guards
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ProviderGuard::new(name, self.defaults.clone())))
            .clone()
    }

    pub fn snapshot(&self) -> Vec<ProviderHealth> {
        self.guards
            .read()
            .expect("provider registry lock poisoned")
            .values()
            .map(|g| ProviderHealth {
                name: g.name().to_string(),
                circuit: g.circuit(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitState;

    #[test]
    fn guard_is_shared_by_name() {
        let registry = ProviderRegistry::default();
        let a = registry.guard("classifier");
        let b = registry.guard("classifier");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn snapshot_lists_providers_in_name_order() {
        let registry = ProviderRegistry::default();
        registry.guard("rewriter");
        registry.guard("classifier");

        let names: Vec<_> = registry.snapshot().into_iter().map(|h| h.name).collect();
        assert_eq!(names, vec!["classifier", "rewriter"]);
    }

    #[test]
    fn breaker_state_shows_in_snapshot() {
        let registry = ProviderRegistry::default();
        let guard = registry.register(
            "fetcher",
            ProviderSettings {
                breaker: crate::CircuitBreakerConfig {
                    failure_threshold: 1,
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        guard.breaker().try_acquire().unwrap().failed();

        let health = registry.snapshot();
        assert_eq!(health[0].circuit.state, CircuitState::Open);
    }
}
