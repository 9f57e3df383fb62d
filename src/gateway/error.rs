use std::error::Error;
use std::fmt;
use std::time::Duration;

use crate::breaker::CircuitOpenError;
use crate::retry::Retryable;

/// A well-formed failure response from the dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub status: u16,
    pub message: String,
}

impl RemoteError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Request timeout, throttling and server errors.
    pub fn is_retryable(&self) -> bool {
        matches!(self.status, 408 | 429 | 500..=599)
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remote error {}: {}", self.status, self.message)
    }
}

impl Error for RemoteError {}

/// One attempt at a remote call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// No response within the attempt's timeout. The remote side may still
    /// complete the request.
    Timeout(Duration),
    /// Connection-level failure; no response was received.
    Transport(String),
    Remote(RemoteError),
}

impl CallError {
    /// Whether this outcome counts against the dependency's breaker.
    /// Client errors mean the dependency is up and answering.
    pub fn trips_breaker(&self) -> bool {
        match self {
            CallError::Timeout(_) | CallError::Transport(_) => true,
            CallError::Remote(remote) => remote.is_server_error(),
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Timeout(after) => write!(f, "call timed out after {}ms", after.as_millis()),
            CallError::Transport(msg) => write!(f, "transport error: {}", msg),
            CallError::Remote(e) => write!(f, "{}", e),
        }
    }
}

impl Error for CallError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CallError::Remote(e) => Some(e),
            _ => None,
        }
    }
}

impl Retryable for CallError {
    fn is_retryable(&self) -> bool {
        match self {
            CallError::Timeout(_) | CallError::Transport(_) => true,
            CallError::Remote(remote) => remote.is_retryable(),
        }
    }
}

/// Why a guarded call returned no response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The dependency's breaker is open; nothing was sent.
    CircuitOpen(CircuitOpenError),
    /// Every attempt failed with a retryable error, or the deadline left no
    /// room for another.
    RetriesExhausted {
        dependency: String,
        attempts: u32,
        last: CallError,
    },
    /// Non-retryable failure response.
    Remote(RemoteError),
    /// Failure the call's retry policy chose not to retry.
    Call(CallError),
    /// No transport registered under this name.
    UnknownDependency(String),
}

impl GatewayError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, GatewayError::CircuitOpen(_))
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::CircuitOpen(e) => write!(f, "{}", e),
            GatewayError::RetriesExhausted {
                dependency,
                attempts,
                last,
            } => write!(
                f,
                "call to '{}' failed after {} attempts: {}",
                dependency, attempts, last
            ),
            GatewayError::Remote(e) => write!(f, "{}", e),
            GatewayError::Call(e) => write!(f, "{}", e),
            GatewayError::UnknownDependency(name) => write!(f, "unknown dependency '{}'", name),
        }
    }
}

impl Error for GatewayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            GatewayError::CircuitOpen(e) => Some(e),
            GatewayError::RetriesExhausted { last, .. } => Some(last),
            GatewayError::Remote(e) => Some(e),
            GatewayError::Call(e) => Some(e),
            GatewayError::UnknownDependency(_) => None,
        }
    }
}
