//! Per-dependency circuit breakers.
//!
//! A breaker counts failures of one remote dependency inside a sliding
//! window. Past the threshold it opens and rejects calls without attempting
//! them; after a cooldown it admits a limited number of trial calls and
//! closes again once they succeed.

mod breaker;
mod config;
mod error;
mod listener;
mod registry;

pub use breaker::{BreakerSnapshot, CircuitBreaker, Permit};
pub use config::CircuitBreakerConfig;
pub use error::{BreakerError, CircuitOpenError};
#[cfg(feature = "emitter")]
pub use listener::EmitterListener;
pub use listener::{CircuitState, StateChange, StateListener};
pub use registry::CircuitBreakerRegistry;
