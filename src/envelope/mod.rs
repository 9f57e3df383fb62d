//! Event Envelope & Codec.
//!
//! An [`EventEnvelope`] is the unit that crosses the asynchronous boundary
//! between the ledger and intelligence services. Its `event_id` is minted
//! once, when the event is created, and is the idempotency key everywhere
//! downstream: the outbox, the stream and the consumer's dedup ledger.
//!
//! [`EnvelopeCodec`] turns envelopes into wire bytes and back. The wire form
//! is self-describing JSON so a newer producer can add fields that an older
//! consumer skips, while a version the consumer has not declared compatible
//! is rejected with [`DecodeError::UnsupportedSchemaVersion`].

mod codec;
mod event;

pub use codec::{DecodeError, EncodeError, EnvelopeCodec};
pub use event::{EventEnvelope, EventId};
