//! Asynchronous boundary between the services.
//!
//! ```text
//!  ledger: EventPublisher ──publish──▶ ┌──────── log ────────┐
//!                                      │ p0 │ p1 │ p2 │ p3  │  key = aggregate_id
//!                                      └─────────────────────┘
//!  intelligence: ConsumerThread ◀─poll / ack / nack──┘
//! ```
//!
//! [`Publisher`] and [`Subscriber`] are the seams a real broker client
//! implements; [`InMemoryLog`] is the included implementation.

mod in_memory_log;
mod publisher;
mod subscriber;

pub use in_memory_log::InMemoryLog;
pub use publisher::{Message, PublishError, Publisher};
pub use subscriber::{Subscribable, Subscriber};
