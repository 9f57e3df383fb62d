//! Outbox Store and Consumed-Event Ledger.
//!
//! Both sides of the asynchronous boundary keep their bookkeeping in the
//! same store as their business state:
//!
//! - the ledger service stages each outgoing [`EventEnvelope`](crate::envelope::EventEnvelope)
//!   in the [`Transaction`] that performs the ledger mutation
//!   ([`OutboxStore`]), so neither can be committed without the other;
//! - the intelligence service writes its dedup [`ConsumedEntry`] in the
//!   transaction that applies the business effect ([`ConsumedEventLedger`]).
//!
//! ```text
//!   ledger write path              publisher (background)
//!   ─────────────────              ──────────────────────
//!   tx = store.begin()             fetch_publishable(limit)
//!   tx.put(...)                    increment_attempt(id, at)
//!   stage_event(&mut tx, e)  ───▶  mark_published(id, at) | mark_failed(id, reason, at)
//!   tx.commit()
//! ```

mod consumed;
mod error;
mod in_memory;
mod outbox;

pub use consumed::{ConsumedEntry, ConsumedEventLedger, ConsumedOutcome};
pub use error::StoreError;
pub use in_memory::{InMemoryStore, Transaction};
pub use outbox::{OutboxCounts, OutboxRecord, OutboxStatus, OutboxStore};
