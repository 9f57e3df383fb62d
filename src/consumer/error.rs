use std::fmt;
use std::time::SystemTime;

use crate::envelope::DecodeError;
use crate::retry::Retryable;
use crate::store::StoreError;

/// Business logic failed while applying an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    /// Worth another delivery (dependency down, lock contention, ...).
    Transient(String),
    /// Will never succeed for this envelope (malformed payload, invalid
    /// state). Goes to the dead-letter sink.
    Permanent(String),
}

impl ProcessingError {
    pub fn transient(reason: impl Into<String>) -> Self {
        ProcessingError::Transient(reason.into())
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        ProcessingError::Permanent(reason.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ProcessingError::Transient(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            ProcessingError::Transient(reason) | ProcessingError::Permanent(reason) => reason,
        }
    }
}

impl fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingError::Transient(reason) => write!(f, "transient processing error: {}", reason),
            ProcessingError::Permanent(reason) => write!(f, "permanent processing error: {}", reason),
        }
    }
}

impl std::error::Error for ProcessingError {}

impl Retryable for ProcessingError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

impl From<DecodeError> for ProcessingError {
    fn from(err: DecodeError) -> Self {
        ProcessingError::Permanent(err.to_string())
    }
}

impl From<StoreError> for ProcessingError {
    fn from(err: StoreError) -> Self {
        ProcessingError::Transient(err.to_string())
    }
}

/// Why a delivery was ignored. Not an error: the effect is already in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateReason {
    /// Found in the consumed-event ledger before processing.
    AlreadyConsumed { consumed_at: SystemTime },
    /// Another delivery of the same event committed first while this one
    /// was processing; this one's effect was rolled back.
    ConcurrentDelivery,
}

/// Result of offering one envelope to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Applied,
    Ignored(DuplicateReason),
    Failed(ProcessingError),
}

impl ConsumeOutcome {
    /// Whether the delivery can be acknowledged on the log.
    pub fn is_settled(&self) -> bool {
        !matches!(self, ConsumeOutcome::Failed(ProcessingError::Transient(_)))
    }
}
