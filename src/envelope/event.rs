use std::collections::HashMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;

/// Globally unique event identifier; doubles as the idempotency key.
pub type EventId = Uuid;

/// A domain event about one ledger record (the aggregate).
///
/// The identity fields are private: once an envelope exists its id,
/// aggregate and creation time can be read but never replaced, so a
/// republished envelope always carries the id it was staged with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    event_id: EventId,
    event_type: String,
    aggregate_id: String,
    payload: Vec<u8>,
    occurred_at: SystemTime,
    schema_version: u32,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl EventEnvelope {
    /// Schema version written by this build.
    pub const CURRENT_SCHEMA_VERSION: u32 = 1;

    /// Create a new envelope with a fresh id, stamped with the current time.
    pub fn new(
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self::from_parts(
            Uuid::new_v4(),
            event_type.into(),
            aggregate_id.into(),
            payload,
            SystemTime::now(),
            Self::CURRENT_SCHEMA_VERSION,
            HashMap::new(),
        )
    }

    /// Create a new envelope stamped with the given clock's time.
    pub fn at(
        clock: &dyn Clock,
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        let mut envelope = Self::new(event_type, aggregate_id, payload);
        envelope.occurred_at = clock.now();
        envelope
    }

    /// Create an envelope with a caller-chosen id.
    ///
    /// Used by adapters that already own an idempotency key (for example a
    /// request id) and want the event to carry it.
    pub fn with_id(
        event_id: EventId,
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        let mut envelope = Self::new(event_type, aggregate_id, payload);
        envelope.event_id = event_id;
        envelope
    }

    /// Create an envelope whose payload is bitcode-encoded from `payload`.
    pub fn encode_payload<T: Serialize>(
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: &T,
    ) -> Result<Self, bitcode::Error> {
        let bytes = bitcode::serialize(payload)?;
        Ok(Self::new(event_type, aggregate_id, bytes))
    }

    /// Decode a bitcode payload.
    pub fn decode_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, bitcode::Error> {
        bitcode::deserialize(&self.payload)
    }

    pub(crate) fn from_parts(
        event_id: EventId,
        event_type: String,
        aggregate_id: String,
        payload: Vec<u8>,
        occurred_at: SystemTime,
        schema_version: u32,
        metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            event_id,
            event_type,
            aggregate_id,
            payload,
            occurred_at,
            schema_version,
            metadata,
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    pub fn occurred_at(&self) -> SystemTime {
        self.occurred_at
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Set a single metadata key-value pair.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_correlation_id(self, id: impl Into<String>) -> Self {
        self.with_meta("correlation_id", id)
    }

    pub fn with_causation_id(self, id: impl Into<String>) -> Self {
        self.with_meta("causation_id", id)
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|s| s.as_str())
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.meta("correlation_id")
    }

    pub fn causation_id(&self) -> Option<&str> {
        self.meta("causation_id")
    }
}
