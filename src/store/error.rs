use std::fmt;

use crate::envelope::EventId;
use crate::retry::Retryable;

use super::outbox::OutboxStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    LockPoisoned(&'static str),
    /// An event with this id is already staged or stored.
    DuplicateEvent(EventId),
    /// No outbox record exists for this id.
    UnknownEvent(EventId),
    /// The outbox record is not in a state that allows the requested change.
    InvalidTransition {
        event_id: EventId,
        from: OutboxStatus,
        to: OutboxStatus,
    },
    /// A dedup entry for this event id was committed by someone else first.
    AlreadyConsumed(EventId),
    /// An earlier operation on this transaction failed; it can only roll back.
    Aborted(String),
    Snapshot(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::LockPoisoned(operation) => {
                write!(f, "store lock poisoned during {}", operation)
            }
            StoreError::DuplicateEvent(id) => write!(f, "event {} already staged", id),
            StoreError::UnknownEvent(id) => write!(f, "no outbox record for event {}", id),
            StoreError::InvalidTransition { event_id, from, to } => write!(
                f,
                "outbox record {} cannot move from {:?} to {:?}",
                event_id, from, to
            ),
            StoreError::AlreadyConsumed(id) => write!(f, "event {} already consumed", id),
            StoreError::Aborted(reason) => write!(f, "transaction aborted: {}", reason),
            StoreError::Snapshot(msg) => write!(f, "snapshot error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        false
    }
}
