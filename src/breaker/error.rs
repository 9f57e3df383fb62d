use std::error::Error;
use std::fmt;
use std::time::Duration;

/// The guarded dependency is presumed unhealthy; no call was attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitOpenError {
    pub name: String,
    /// Time left until the breaker admits a trial call, when known.
    pub retry_after: Option<Duration>,
}

impl fmt::Display for CircuitOpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.retry_after {
            Some(after) => write!(
                f,
                "circuit '{}' is open (retry after {}ms)",
                self.name,
                after.as_millis()
            ),
            None => write!(f, "circuit '{}' is open", self.name),
        }
    }
}

impl Error for CircuitOpenError {}

/// Result of running an operation through [`CircuitBreaker::call`](super::CircuitBreaker::call).
#[derive(Debug)]
pub enum BreakerError<E> {
    /// Rejected without calling the operation.
    Open(CircuitOpenError),
    /// The operation ran and failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open(e) => write!(f, "{}", e),
            BreakerError::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: Error + 'static> Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BreakerError::Open(e) => Some(e),
            BreakerError::Inner(e) => Some(e),
        }
    }
}
