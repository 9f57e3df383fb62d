use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::clock::{self, SharedClock};

use super::config::CircuitBreakerConfig;
use super::error::{BreakerError, CircuitOpenError};
use super::listener::{CircuitState, StateChange, StateListener};

/// Point-in-time view of a breaker, for health reporting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub consecutive_reopens: u32,
    pub last_state_change_at: SystemTime,
    pub open_until: Option<SystemTime>,
}

struct Inner {
    state: CircuitState,
    /// Closed-state failure timestamps inside the sliding window.
    failures: VecDeque<SystemTime>,
    success_count: u32,
    trials_in_flight: u32,
    consecutive_reopens: u32,
    last_state_change_at: SystemTime,
    open_until: Option<SystemTime>,
    /// Bumped on every transition; outcomes from an older generation are stale.
    generation: u64,
}

/// Per-dependency circuit breaker.
///
/// ```text
///            failures ≥ threshold             now ≥ open_until
///  CLOSED ──────────────────────────▶ OPEN ─────────────────────▶ HALF_OPEN
///    ▲                                 ▲                              │
///    │     trial successes ≥ threshold │   trial failure (cooldown×m) │
///    └─────────────────────────────────┼──────────────────────────────┘
///                                      └──────────────────────────────┘
/// ```
///
/// State lives behind a mutex owned by this instance only, so unrelated
/// dependencies never contend. Counters reset on every transition.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: SharedClock,
    inner: Mutex<Inner>,
    listeners: RwLock<Vec<Arc<dyn StateListener>>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, clock::system())
    }

    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: SharedClock,
    ) -> Self {
        let now = clock.now();
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                success_count: 0,
                trials_in_flight: 0,
                consecutive_reopens: 0,
                last_state_change_at: now,
                open_until: None,
                generation: 0,
            }),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn add_listener(&self, listener: Arc<dyn StateListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Stored state. An open breaker whose cooldown has elapsed reports
    /// `Open` until the next call moves it to `HalfOpen`.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failures.len() as u32,
            success_count: inner.success_count,
            consecutive_reopens: inner.consecutive_reopens,
            last_state_change_at: inner.last_state_change_at,
            open_until: inner.open_until,
        }
    }

    /// Ask to make a call. Fails fast while open.
    ///
    /// The returned [`Permit`] must be resolved with
    /// [`success`](Permit::success) or [`failure`](Permit::failure); a
    /// permit dropped unresolved gives its trial slot back without counting.
    pub fn try_acquire(&self) -> Result<Permit<'_>, CircuitOpenError> {
        let now = self.clock.now();
        let (result, change) = {
            let mut inner = self.lock();
            let mut change = None;

            if inner.state == CircuitState::Open {
                let open_until = inner.open_until;
                match open_until {
                    Some(until) if now < until => {
                        let retry_after = until.duration_since(now).ok();
                        return Err(self.open_error(retry_after));
                    }
                    _ => change = Some(self.transition(&mut inner, CircuitState::HalfOpen, now)),
                }
            }

            let result = match inner.state {
                CircuitState::Closed => Ok(Permit::new(self, inner.generation, false)),
                CircuitState::HalfOpen => {
                    if inner.trials_in_flight < self.config.half_open_max_calls {
                        inner.trials_in_flight += 1;
                        Ok(Permit::new(self, inner.generation, true))
                    } else {
                        Err(self.open_error(None))
                    }
                }
                CircuitState::Open => Err(self.open_error(None)),
            };
            (result, change)
        };

        if let Some(change) = change {
            self.notify(&change);
        }
        result
    }

    /// Run `operation` through the breaker, counting every `Err` as a failure.
    pub fn call<T, E, F>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.call_with(operation, |_| true)
    }

    /// Run `operation` through the breaker. Errors for which `is_failure`
    /// returns false are passed back to the caller but count as a healthy
    /// response from the dependency.
    pub fn call_with<T, E, F, P>(&self, operation: F, is_failure: P) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        P: FnOnce(&E) -> bool,
    {
        let permit = self.try_acquire().map_err(BreakerError::Open)?;
        match operation() {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(err) => {
                if is_failure(&err) {
                    permit.failure();
                } else {
                    permit.success();
                }
                Err(BreakerError::Inner(err))
            }
        }
    }

    /// Force the breaker closed and clear all counters.
    pub fn reset(&self) {
        let now = self.clock.now();
        let change = {
            let mut inner = self.lock();
            inner.consecutive_reopens = 0;
            if inner.state == CircuitState::Closed {
                inner.failures.clear();
                None
            } else {
                Some(self.transition(&mut inner, CircuitState::Closed, now))
            }
        };
        if let Some(change) = change {
            self.notify(&change);
        }
    }

    fn on_success(&self, generation: u64, trial: bool) {
        let now = self.clock.now();
        let change = {
            let mut inner = self.lock();
            if inner.generation != generation {
                return;
            }
            match inner.state {
                CircuitState::HalfOpen if trial => {
                    inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
                    inner.success_count += 1;
                    if inner.success_count >= self.config.success_threshold {
                        inner.consecutive_reopens = 0;
                        Some(self.transition(&mut inner, CircuitState::Closed, now))
                    } else {
                        None
                    }
                }
                CircuitState::Closed => {
                    inner.success_count = inner.success_count.saturating_add(1);
                    None
                }
                _ => None,
            }
        };
        if let Some(change) = change {
            self.notify(&change);
        }
    }

    fn on_failure(&self, generation: u64, trial: bool) {
        let now = self.clock.now();
        let change = {
            let mut inner = self.lock();
            if inner.generation != generation {
                return;
            }
            match inner.state {
                CircuitState::Closed => {
                    self.prune(&mut inner, now);
                    inner.failures.push_back(now);
                    if inner.failures.len() as u32 >= self.config.failure_threshold {
                        inner.consecutive_reopens = 0;
                        let change = self.transition(&mut inner, CircuitState::Open, now);
                        Some(change)
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen if trial => {
                    inner.consecutive_reopens += 1;
                    Some(self.transition(&mut inner, CircuitState::Open, now))
                }
                _ => None,
            }
        };
        if let Some(change) = change {
            self.notify(&change);
        }
    }

    fn release_trial(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation == generation && inner.state == CircuitState::HalfOpen {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
        }
    }

    fn prune(&self, inner: &mut Inner, now: SystemTime) {
        while let Some(oldest) = inner.failures.front() {
            let expired = now
                .duration_since(*oldest)
                .map(|age| age >= self.config.window)
                .unwrap_or(false);
            if expired {
                inner.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState, now: SystemTime) -> StateChange {
        let from = inner.state;
        inner.state = to;
        inner.failures.clear();
        inner.success_count = 0;
        inner.trials_in_flight = 0;
        inner.generation += 1;
        inner.last_state_change_at = now;
        inner.open_until = match to {
            CircuitState::Open => Some(now + self.config.cooldown_for(inner.consecutive_reopens)),
            _ => None,
        };

        StateChange {
            breaker: self.name.clone(),
            from,
            to,
            at: now,
            open_until: inner.open_until,
        }
    }

    fn notify(&self, change: &StateChange) {
        match change.to {
            CircuitState::Open => tracing::warn!(
                breaker = %change.breaker,
                from = ?change.from,
                open_until = ?change.open_until,
                "circuit opened"
            ),
            _ => tracing::info!(
                breaker = %change.breaker,
                from = ?change.from,
                to = ?change.to,
                "circuit state changed"
            ),
        }

        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener.on_state_change(change);
        }
    }

    fn open_error(&self, retry_after: Option<std::time::Duration>) -> CircuitOpenError {
        CircuitOpenError {
            name: self.name.clone(),
            retry_after,
        }
    }

    // Every mutation leaves `Inner` consistent, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Admission to make one call through a [`CircuitBreaker`].
#[must_use = "resolve the permit with success() or failure()"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    resolved: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, generation: u64, trial: bool) -> Self {
        Self {
            breaker,
            generation,
            trial,
            resolved: false,
        }
    }

    /// Whether this call is a half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.on_success(self.generation, self.trial);
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.on_failure(self.generation, self.trial);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.trial {
            self.breaker.release_trial(self.generation);
        }
    }
}
