use std::time::SystemTime;

use serde::{Deserialize, Serialize};

#[cfg(feature = "emitter")]
use std::sync::{Mutex, PoisonError};

#[cfg(feature = "emitter")]
use crate::EventEmitter;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// A breaker moved from one state to another.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub breaker: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: SystemTime,
    pub open_until: Option<SystemTime>,
}

/// Receives breaker state transitions. Called after the breaker's lock is
/// released, on the thread that caused the transition.
pub trait StateListener: Send + Sync {
    fn on_state_change(&self, change: &StateChange);
}

impl<F> StateListener for F
where
    F: Fn(&StateChange) + Send + Sync,
{
    fn on_state_change(&self, change: &StateChange) {
        self(change)
    }
}

/// Re-emits state changes on an [`EventEmitter`] for in-process subscribers.
///
/// Subscribers register on the emitter before it is handed over:
///
/// ```ignore
/// let mut emitter = EventEmitter::new();
/// emitter.on(EmitterListener::EVENT, |change: StateChange| { /* ... */ });
/// registry.add_listener(Arc::new(EmitterListener::new(emitter)));
/// ```
#[cfg(feature = "emitter")]
pub struct EmitterListener {
    emitter: Mutex<EventEmitter>,
}

#[cfg(feature = "emitter")]
impl EmitterListener {
    pub const EVENT: &'static str = "circuit.state_changed";

    pub fn new(emitter: EventEmitter) -> Self {
        Self {
            emitter: Mutex::new(emitter),
        }
    }
}

#[cfg(feature = "emitter")]
impl StateListener for EmitterListener {
    fn on_state_change(&self, change: &StateChange) {
        let handles = {
            let mut emitter = self.emitter.lock().unwrap_or_else(PoisonError::into_inner);
            emitter.emit(Self::EVENT, change.clone())
        };
        for handle in handles {
            let _ = handle.join();
        }
    }
}
