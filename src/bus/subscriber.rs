//! Consuming side of the event log.

use super::publisher::{Message, PublishError};

/// Pull-based consumer of the log.
///
/// A polled message stays in flight until it is acked or nacked. A nacked
/// message is redelivered before anything after it on the same partition.
pub trait Subscriber: Send + Sync {
    /// Poll for the next message, blocking until one is available or timeout.
    fn poll(&self, timeout_ms: u64) -> Result<Option<Message>, PublishError>;

    /// Acknowledge that a message has been processed.
    fn ack(&self, message_id: &str) -> Result<(), PublishError>;

    /// Reject a message so it is delivered again.
    fn nack(&self, message_id: &str, reason: &str) -> Result<(), PublishError>;
}

/// Subscribers that can start an independent consumer group.
pub trait Subscribable: Subscriber + Sized {
    /// Create a subscriber in a new consumer group, reading the same log
    /// from the beginning.
    fn new_subscriber(&self) -> Self;
}
