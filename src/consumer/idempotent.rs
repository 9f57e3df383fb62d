use crate::bus::Message;
use crate::clock::{self, SharedClock};
use crate::envelope::{EnvelopeCodec, EventEnvelope};
use crate::store::{ConsumedEntry, ConsumedEventLedger, StoreError};

use super::error::{ConsumeOutcome, DuplicateReason, ProcessingError};
use super::handler::EventHandler;

/// Applies each event's business effect at most once.
///
/// The ledger is checked before the handler runs; the handler's writes and
/// the new dedup entry then commit in one transaction. If two deliveries of
/// the same event race, the loser's commit is rejected and its effect
/// discarded.
pub struct IdempotentConsumer<L, H> {
    ledger: L,
    handler: H,
    codec: EnvelopeCodec,
    clock: SharedClock,
}

impl<L, H> IdempotentConsumer<L, H>
where
    L: ConsumedEventLedger,
    H: EventHandler,
{
    pub fn new(ledger: L, handler: H) -> Self {
        Self {
            ledger,
            handler,
            codec: EnvelopeCodec::new(),
            clock: clock::system(),
        }
    }

    pub fn with_codec(mut self, codec: EnvelopeCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Decode a log message and apply it. Undecodable bytes fail
    /// permanently.
    pub fn on_message(&self, message: &Message) -> ConsumeOutcome {
        match self.codec.decode(&message.payload) {
            Ok(envelope) => self.on_receive(&envelope),
            Err(err) => {
                tracing::warn!(message_id = %message.id, error = %err, "undecodable message");
                ConsumeOutcome::Failed(err.into())
            }
        }
    }

    pub fn on_receive(&self, envelope: &EventEnvelope) -> ConsumeOutcome {
        let event_id = envelope.event_id();

        match self.ledger.lookup(event_id) {
            Ok(Some(entry)) => {
                self.note_duplicate(envelope);
                return ConsumeOutcome::Ignored(DuplicateReason::AlreadyConsumed {
                    consumed_at: entry.consumed_at,
                });
            }
            Ok(None) => {}
            Err(err) => return ConsumeOutcome::Failed(err.into()),
        }

        let mut tx = self.ledger.begin();
        if let Err(err) = self.handler.handle(envelope, &mut tx) {
            tracing::debug!(%event_id, error = %err, "handler failed, effect rolled back");
            return ConsumeOutcome::Failed(err);
        }

        let entry = ConsumedEntry::applied(
            event_id,
            envelope.event_type(),
            envelope.aggregate_id(),
            self.clock.now(),
        );
        if let Err(err) = self.ledger.record_consumed(&mut tx, entry) {
            return ConsumeOutcome::Failed(err.into());
        }

        match tx.commit() {
            Ok(()) => {
                tracing::debug!(
                    %event_id,
                    event_type = envelope.event_type(),
                    aggregate_id = envelope.aggregate_id(),
                    "event applied"
                );
                ConsumeOutcome::Applied
            }
            Err(StoreError::AlreadyConsumed(_)) => {
                self.note_duplicate(envelope);
                ConsumeOutcome::Ignored(DuplicateReason::ConcurrentDelivery)
            }
            Err(err) => ConsumeOutcome::Failed(ProcessingError::from(err)),
        }
    }

    fn note_duplicate(&self, envelope: &EventEnvelope) {
        tracing::debug!(event_id = %envelope.event_id(), "duplicate delivery ignored");
        if let Err(err) = self.ledger.record_duplicate(envelope.event_id()) {
            tracing::warn!(event_id = %envelope.event_id(), error = %err, "could not record duplicate");
        }
    }
}
