use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::bus::Message;
use crate::store::StoreError;

/// A delivery the consumer gave up on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub message_id: String,
    pub key: String,
    pub event_type: String,
    /// Raw bytes as received, so the message can be inspected or replayed.
    pub payload: Vec<u8>,
    pub reason: String,
    pub delivery_count: u32,
    pub dead_lettered_at: SystemTime,
}

impl DeadLetter {
    pub fn from_message(message: &Message, reason: impl Into<String>, at: SystemTime) -> Self {
        Self {
            message_id: message.id.clone(),
            key: message.key.clone(),
            event_type: message.event_type.clone(),
            payload: message.payload.clone(),
            reason: reason.into(),
            delivery_count: message.delivery_count,
            dead_lettered_at: at,
        }
    }
}

/// Terminal holding area for undeliverable events. A message is only
/// acknowledged on the log after its dead letter is stored.
pub trait DeadLetterSink: Send + Sync {
    fn dead_letter(&self, letter: DeadLetter) -> Result<(), StoreError>;

    fn count(&self) -> Result<usize, StoreError>;
}

/// Dead letters kept in memory. Clones share the same list.
#[derive(Clone, Default)]
pub struct InMemoryDeadLetters {
    letters: Arc<Mutex<Vec<DeadLetter>>>,
}

impl InMemoryDeadLetters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn letters(&self) -> Result<Vec<DeadLetter>, StoreError> {
        self.letters
            .lock()
            .map(|letters| letters.clone())
            .map_err(|_| StoreError::LockPoisoned("dead letters"))
    }

    /// Remove and return every letter, for replay.
    pub fn drain(&self) -> Result<Vec<DeadLetter>, StoreError> {
        self.letters
            .lock()
            .map(|mut letters| std::mem::take(&mut *letters))
            .map_err(|_| StoreError::LockPoisoned("dead letters"))
    }
}

impl DeadLetterSink for InMemoryDeadLetters {
    fn dead_letter(&self, letter: DeadLetter) -> Result<(), StoreError> {
        tracing::warn!(
            message_id = %letter.message_id,
            event_type = %letter.event_type,
            reason = %letter.reason,
            "event dead-lettered"
        );
        self.letters
            .lock()
            .map_err(|_| StoreError::LockPoisoned("dead letters"))?
            .push(letter);
        Ok(())
    }

    fn count(&self) -> Result<usize, StoreError> {
        self.letters
            .lock()
            .map(|letters| letters.len())
            .map_err(|_| StoreError::LockPoisoned("dead letters"))
    }
}
