use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::clock::{self, SharedClock};

use super::breaker::{BreakerSnapshot, CircuitBreaker};
use super::config::CircuitBreakerConfig;
use super::listener::StateListener;

/// One [`CircuitBreaker`] per remote dependency, created on first use.
///
/// Repeated lookups of the same name return the same `Arc`, so every caller
/// of a dependency shares its failure accounting.
pub struct CircuitBreakerRegistry {
    defaults: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    listeners: RwLock<Vec<Arc<dyn StateListener>>>,
    clock: SharedClock,
}

impl CircuitBreakerRegistry {
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self::with_clock(defaults, clock::system())
    }

    pub fn with_clock(defaults: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            defaults,
            overrides: HashMap::new(),
            breakers: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            clock,
        }
    }

    /// Use `config` instead of the defaults for the dependency `name`.
    /// Only affects breakers created after the call.
    pub fn with_override(mut self, name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        self.overrides.insert(name.into(), config);
        self
    }

    pub fn config_for(&self, name: &str) -> &CircuitBreakerConfig {
        self.overrides.get(name).unwrap_or(&self.defaults)
    }

    /// Attach `listener` to every existing and future breaker.
    pub fn add_listener(&self, listener: Arc<dyn StateListener>) {
        for breaker in self.read_breakers().values() {
            breaker.add_listener(Arc::clone(&listener));
        }
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.read_breakers().get(name).cloned()
    }

    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.get(name) {
            return existing;
        }

        let mut breakers = self
            .breakers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let breaker = CircuitBreaker::with_clock(
                    name,
                    self.config_for(name).clone(),
                    Arc::clone(&self.clock),
                );
                for listener in self
                    .listeners
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .iter()
                {
                    breaker.add_listener(Arc::clone(listener));
                }
                tracing::debug!(breaker = name, "circuit breaker created");
                Arc::new(breaker)
            })
            .clone()
    }

    /// Snapshots of every breaker, sorted by name.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self
            .read_breakers()
            .values()
            .map(|breaker| breaker.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    fn read_breakers(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
