use std::error::Error;
use std::fmt;

use crate::store::StoreError;

/// Failure of a command handler. Each variant maps to a status code that
/// the calling gateway classifies for retry and breaker accounting.
#[derive(Debug)]
pub enum HandlerError {
    UnknownCommand(String),
    /// Input did not deserialize into the handler's type.
    DecodeFailed(String),
    /// The guard refused the input.
    GuardRejected(String),
    /// Business rule refused the command.
    Rejected(String),
    NotFound(String),
    /// The service cannot answer right now; callers may retry.
    Unavailable(String),
    Store(StoreError),
    Other(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::UnknownCommand(name) => write!(f, "unknown command: {}", name),
            HandlerError::DecodeFailed(msg) => write!(f, "decode failed: {}", msg),
            HandlerError::GuardRejected(name) => write!(f, "guard rejected command: {}", name),
            HandlerError::Rejected(msg) => write!(f, "rejected: {}", msg),
            HandlerError::NotFound(id) => write!(f, "not found: {}", id),
            HandlerError::Unavailable(msg) => write!(f, "unavailable: {}", msg),
            HandlerError::Store(e) => write!(f, "store error: {}", e),
            HandlerError::Other(e) => write!(f, "handler error: {}", e),
        }
    }
}

impl Error for HandlerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            HandlerError::Store(e) => Some(e),
            HandlerError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<StoreError> for HandlerError {
    fn from(err: StoreError) -> Self {
        HandlerError::Store(err)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::DecodeFailed(err.to_string())
    }
}

impl HandlerError {
    pub fn status_code(&self) -> u16 {
        match self {
            HandlerError::UnknownCommand(_) => 404,
            HandlerError::DecodeFailed(_) => 400,
            HandlerError::GuardRejected(_) => 400,
            HandlerError::Rejected(_) => 422,
            HandlerError::NotFound(_) => 404,
            HandlerError::Unavailable(_) => 503,
            HandlerError::Store(_) => 500,
            HandlerError::Other(_) => 500,
        }
    }
}
