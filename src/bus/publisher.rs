//! Messages and the publishing side of the event log.

use std::error::Error;
use std::fmt;

use crate::envelope::{EncodeError, EnvelopeCodec, EventEnvelope};
use crate::retry::Retryable;

/// One record on the log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Event id of the carried envelope; repeated on republish.
    pub id: String,
    /// Partition key. Messages with the same key keep their relative order.
    pub key: String,
    pub event_type: String,
    /// Encoded envelope bytes.
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
    /// Times this message has been handed to a subscriber, set on poll.
    pub delivery_count: u32,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        key: impl Into<String>,
        event_type: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            event_type: event_type.into(),
            payload,
            headers: Vec::new(),
            delivery_count: 0,
        }
    }

    /// Encode `envelope` into a message keyed by its aggregate id.
    pub fn from_envelope(codec: &EnvelopeCodec, envelope: &EventEnvelope) -> Result<Self, EncodeError> {
        let bytes = codec.encode(envelope)?;
        let mut message = Self::new(
            envelope.event_id().to_string(),
            envelope.aggregate_id(),
            envelope.event_type(),
            bytes,
        );
        if let Some(correlation_id) = envelope.correlation_id() {
            message = message.with_header("correlation_id", correlation_id);
        }
        Ok(message)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}

/// Error type for log operations.
#[derive(Debug)]
pub enum PublishError {
    /// Connection to the broker failed
    ConnectionFailed(String),
    /// Serialization of the message failed
    SerializationFailed(String),
    /// The broker rejected the message
    Rejected(String),
    /// Timeout waiting for acknowledgment
    Timeout,
    /// Ack or nack for a message that is not in flight
    UnknownDelivery(String),
    LockPoisoned(&'static str),
    Other(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::ConnectionFailed(msg) => write!(f, "connection failed: {}", msg),
            PublishError::SerializationFailed(msg) => write!(f, "serialization failed: {}", msg),
            PublishError::Rejected(msg) => write!(f, "message rejected: {}", msg),
            PublishError::Timeout => write!(f, "publish timeout"),
            PublishError::UnknownDelivery(id) => write!(f, "no delivery in flight for '{}'", id),
            PublishError::LockPoisoned(what) => write!(f, "{} lock poisoned", what),
            PublishError::Other(e) => write!(f, "publish error: {}", e),
        }
    }
}

impl Error for PublishError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PublishError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<EncodeError> for PublishError {
    fn from(err: EncodeError) -> Self {
        PublishError::SerializationFailed(err.0)
    }
}

impl Retryable for PublishError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            PublishError::ConnectionFailed(_) | PublishError::Timeout
        )
    }
}

/// Appends messages to the log.
///
/// `Ok` means the broker acknowledged the write; only then may the outbox
/// record be marked published.
pub trait Publisher: Send + Sync {
    fn publish(&self, message: Message) -> Result<(), PublishError>;

    /// Default implementation publishes messages sequentially and stops at
    /// the first failure.
    fn publish_batch(&self, messages: Vec<Message>) -> Result<(), PublishError> {
        for message in messages {
            self.publish(message)?;
        }
        Ok(())
    }
}
