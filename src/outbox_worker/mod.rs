//! Event publisher: drains the ledger's outbox onto the log.
//!
//! The outbox has two phases. Staging happens in the ledger's write path
//! (see [`store`](crate::store)); publishing happens here, either one
//! drain at a time with [`EventPublisher::drain_once`] or continuously on
//! a [`PublisherThread`].

mod publisher;
mod thread;

pub use publisher::{DrainReport, EventPublisher, PublisherConfig};
pub use thread::{PublisherStats, PublisherThread};
