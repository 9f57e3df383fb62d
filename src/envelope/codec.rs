use std::collections::HashMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::time::SystemTime;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::retry::Retryable;

use super::event::EventEnvelope;

/// Error decoding wire bytes into an envelope. Never retryable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Bytes are not a well-formed envelope (bad JSON, missing or mistyped field).
    Malformed(String),
    /// The envelope declares a schema version this decoder does not accept.
    UnsupportedSchemaVersion { found: u32, min: u32, max: u32 },
    /// The payload field is not valid base64.
    InvalidPayload(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Malformed(msg) => write!(f, "malformed envelope: {}", msg),
            DecodeError::UnsupportedSchemaVersion { found, min, max } => write!(
                f,
                "unsupported schema version {} (supported {}..={})",
                found, min, max
            ),
            DecodeError::InvalidPayload(msg) => write!(f, "invalid envelope payload: {}", msg),
        }
    }
}

impl std::error::Error for DecodeError {}

impl Retryable for DecodeError {
    fn is_retryable(&self) -> bool {
        false
    }
}

/// Error encoding an envelope to wire bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeError(pub String);

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "envelope encode failed: {}", self.0)
    }
}

impl std::error::Error for EncodeError {}

#[derive(Serialize)]
struct WireOut<'a> {
    schema_version: u32,
    event_id: Uuid,
    event_type: &'a str,
    aggregate_id: &'a str,
    occurred_at: SystemTime,
    payload: String,
    metadata: &'a HashMap<String, String>,
}

#[derive(Deserialize)]
struct WireIn {
    schema_version: u32,
    event_id: Uuid,
    event_type: String,
    aggregate_id: String,
    occurred_at: SystemTime,
    payload: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Deserialize)]
struct VersionProbe {
    schema_version: Option<u32>,
}

/// JSON wire codec for [`EventEnvelope`].
///
/// The decoder reads `schema_version` first. Any version inside the declared
/// compatible range is decoded field by field and unrecognised fields are
/// skipped; anything outside the range fails with
/// [`DecodeError::UnsupportedSchemaVersion`] before the payload is touched.
///
/// ```
/// use trackwise_resilience::envelope::{EnvelopeCodec, EventEnvelope};
///
/// let codec = EnvelopeCodec::new();
/// let envelope = EventEnvelope::new("EntryPosted", "acct-1", br#"{"cents":100}"#.to_vec());
/// let bytes = codec.encode(&envelope).unwrap();
/// assert_eq!(codec.decode(&bytes).unwrap(), envelope);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeCodec {
    min_version: u32,
    max_version: u32,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeCodec {
    /// Codec accepting only the current schema version.
    pub fn new() -> Self {
        Self {
            min_version: EventEnvelope::CURRENT_SCHEMA_VERSION,
            max_version: EventEnvelope::CURRENT_SCHEMA_VERSION,
        }
    }

    /// Declare the range of schema versions this decoder understands. The
    /// upper bound is also the version [`encode`](Self::encode) writes. An
    /// inverted range is read with its bounds swapped.
    pub fn with_supported_versions(mut self, versions: RangeInclusive<u32>) -> Self {
        let (start, end) = versions.into_inner();
        self.min_version = start.min(end);
        self.max_version = start.max(end);
        self
    }

    /// Schema version stamped on everything this codec encodes.
    pub fn written_version(&self) -> u32 {
        self.max_version
    }

    pub fn supported_versions(&self) -> RangeInclusive<u32> {
        self.min_version..=self.max_version
    }

    pub fn supports(&self, version: u32) -> bool {
        self.supported_versions().contains(&version)
    }

    pub fn encode(&self, envelope: &EventEnvelope) -> Result<Vec<u8>, EncodeError> {
        let wire = WireOut {
            schema_version: self.written_version(),
            event_id: envelope.event_id(),
            event_type: envelope.event_type(),
            aggregate_id: envelope.aggregate_id(),
            occurred_at: envelope.occurred_at(),
            payload: STANDARD.encode(envelope.payload()),
            metadata: envelope.metadata(),
        };
        serde_json::to_vec(&wire).map_err(|e| EncodeError(e.to_string()))
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<EventEnvelope, DecodeError> {
        let probe: VersionProbe =
            serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        let version = probe
            .schema_version
            .ok_or_else(|| DecodeError::Malformed("missing field `schema_version`".into()))?;

        if !self.supports(version) {
            return Err(DecodeError::UnsupportedSchemaVersion {
                found: version,
                min: self.min_version,
                max: self.max_version,
            });
        }

        let wire: WireIn =
            serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;

        if wire.event_id.is_nil() {
            return Err(DecodeError::Malformed("nil event_id".into()));
        }

        let payload = STANDARD
            .decode(wire.payload.as_bytes())
            .map_err(|e| DecodeError::InvalidPayload(e.to_string()))?;

        Ok(EventEnvelope::from_parts(
            wire.event_id,
            wire.event_type,
            wire.aggregate_id,
            payload,
            wire.occurred_at,
            wire.schema_version,
            wire.metadata,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn encoded_value(codec: &EnvelopeCodec, envelope: &EventEnvelope) -> Value {
        serde_json::from_slice(&codec.encode(envelope).unwrap()).unwrap()
    }

    #[test]
    fn metadata_survives_the_wire() {
        let codec = EnvelopeCodec::new();
        let envelope = EventEnvelope::new("EntryPosted", "acct-1", vec![0, 159, 146, 150])
            .with_correlation_id("req-1");
        let decoded = codec.decode(&codec.encode(&envelope).unwrap()).unwrap();
        assert_eq!(decoded.correlation_id(), Some("req-1"));
        assert_eq!(decoded.payload(), &[0, 159, 146, 150]);
    }

    #[test]
    fn compatible_newer_version_ignores_unknown_fields() {
        let codec = EnvelopeCodec::new().with_supported_versions(1..=2);
        let envelope = EventEnvelope::new("EntryPosted", "acct-1", b"x".to_vec());

        let mut value = encoded_value(&codec, &envelope);
        value["schema_version"] = json!(2);
        value["ledger_region"] = json!("eu-west");
        value["extensions"] = json!({ "fx_rate": "1.08" });

        let decoded = codec.decode(&serde_json::to_vec(&value).unwrap()).unwrap();
        assert_eq!(decoded.event_id(), envelope.event_id());
        assert_eq!(decoded.schema_version(), 2);
        assert_eq!(decoded.payload(), b"x");
    }

    #[test]
    fn encode_stamps_the_written_version() {
        let envelope = EventEnvelope::new("EntryPosted", "acct-1", b"x".to_vec());

        let current = EnvelopeCodec::new();
        assert_eq!(encoded_value(&current, &envelope)["schema_version"], json!(1));

        let upgraded = EnvelopeCodec::new().with_supported_versions(1..=2);
        assert_eq!(upgraded.written_version(), 2);
        assert_eq!(encoded_value(&upgraded, &envelope)["schema_version"], json!(2));
        let decoded = upgraded.decode(&upgraded.encode(&envelope).unwrap()).unwrap();
        assert_eq!(decoded.schema_version(), 2);
        assert_eq!(decoded.event_id(), envelope.event_id());

        // Readers still on v1 refuse what the upgraded writer produced.
        let err = current.decode(&upgraded.encode(&envelope).unwrap()).unwrap_err();
        assert_eq!(err, DecodeError::UnsupportedSchemaVersion { found: 2, min: 1, max: 1 });
    }

    #[test]
    #[allow(clippy::reversed_empty_ranges)]
    fn inverted_range_is_normalised() {
        let codec = EnvelopeCodec::new().with_supported_versions(3..=1);
        assert_eq!(codec.supported_versions(), 1..=3);
        assert!(codec.supports(2));
        assert_eq!(codec.written_version(), 3);
    }

    #[test]
    fn undeclared_version_is_rejected() {
        let codec = EnvelopeCodec::new();
        let envelope = EventEnvelope::new("EntryPosted", "acct-1", b"x".to_vec());

        let mut value = encoded_value(&codec, &envelope);
        value["schema_version"] = json!(3);
        value["payload"] = json!("not base64 in v3 !!");

        let err = codec.decode(&serde_json::to_vec(&value).unwrap()).unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnsupportedSchemaVersion { found: 3, min: 1, max: 1 }
        );
    }

    #[test]
    fn garbage_is_malformed() {
        let codec = EnvelopeCodec::new();
        assert!(matches!(codec.decode(b"\x00\x01"), Err(DecodeError::Malformed(_))));
        assert!(matches!(
            codec.decode(br#"{"event_type":"x"}"#),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn missing_identity_field_is_malformed() {
        let codec = EnvelopeCodec::new();
        let envelope = EventEnvelope::new("EntryPosted", "acct-1", Vec::new());
        let mut value = encoded_value(&codec, &envelope);
        value.as_object_mut().unwrap().remove("event_id");

        let err = codec.decode(&serde_json::to_vec(&value).unwrap()).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn bad_payload_encoding() {
        let codec = EnvelopeCodec::new();
        let envelope = EventEnvelope::new("EntryPosted", "acct-1", Vec::new());
        let mut value = encoded_value(&codec, &envelope);
        value["payload"] = json!("***");

        let err = codec.decode(&serde_json::to_vec(&value).unwrap()).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidPayload(_)));
    }
}
