//! Intelligence-side ingestion: idempotent application of events.
//!
//! The log delivers at least once. [`IdempotentConsumer`] turns that into
//! at-most-once business effects by keeping a consumed-event ledger in the
//! same transaction as the effect. [`ConsumerThread`] settles each delivery
//! on the log: ack, nack for redelivery, or dead-letter.

mod dead_letter;
mod error;
mod handler;
mod idempotent;
mod thread;

pub use dead_letter::{DeadLetter, DeadLetterSink, InMemoryDeadLetters};
pub use error::{ConsumeOutcome, DuplicateReason, ProcessingError};
pub use handler::EventHandler;
pub use idempotent::IdempotentConsumer;
pub use thread::{ConsumerConfig, ConsumerStats, ConsumerThread};
