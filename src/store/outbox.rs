use std::collections::HashSet;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::envelope::{EventEnvelope, EventId};

use super::error::StoreError;
use super::in_memory::Transaction;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutboxStatus {
    Pending,
    Published,
    /// Retry budget exhausted. Terminal until an operator requeues it.
    Failed,
}

/// An event staged for publication, committed together with the ledger
/// mutation that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// Commit order; `fetch_pending` returns records sorted by it.
    pub sequence: u64,
    pub event: EventEnvelope,
    pub status: OutboxStatus,
    pub attempt_count: u32,
    pub last_attempt_at: Option<SystemTime>,
    pub published_at: Option<SystemTime>,
    pub failed_at: Option<SystemTime>,
    pub last_error: Option<String>,
}

impl OutboxRecord {
    pub(crate) fn staged(sequence: u64, event: EventEnvelope) -> Self {
        Self {
            sequence,
            event,
            status: OutboxStatus::Pending,
            attempt_count: 0,
            last_attempt_at: None,
            published_at: None,
            failed_at: None,
            last_error: None,
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event.event_id()
    }

    pub fn aggregate_id(&self) -> &str {
        self.event.aggregate_id()
    }

    pub fn is_pending(&self) -> bool {
        self.status == OutboxStatus::Pending
    }

    pub fn is_published(&self) -> bool {
        self.status == OutboxStatus::Published
    }

    pub fn is_failed(&self) -> bool {
        self.status == OutboxStatus::Failed
    }
}

/// Number of outbox records per status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxCounts {
    pub pending: usize,
    pub published: usize,
    pub failed: usize,
}

impl OutboxCounts {
    pub fn total(&self) -> usize {
        self.pending + self.published + self.failed
    }
}

/// The ledger service's transactional outbox.
///
/// Staging happens inside the caller's [`Transaction`]: the event becomes
/// visible exactly when the transaction's state mutation commits, and a
/// failed stage aborts the whole transaction. Every other operation belongs
/// to the publisher.
pub trait OutboxStore: Send + Sync {
    /// Stage `event` in the same unit of work as the caller's mutation.
    fn stage_event(&self, tx: &mut Transaction, event: EventEnvelope) -> Result<(), StoreError>;

    /// Up to `limit` pending records, oldest first.
    fn fetch_pending(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError>;

    /// Up to `limit` pending records, oldest first, skipping every record of
    /// an aggregate listed by [`failed_aggregates`](Self::failed_aggregates).
    /// The skip happens before `limit` applies, so a blocked backlog never
    /// crowds out other aggregates.
    fn fetch_publishable(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError>;

    /// Record confirmed broker acknowledgment at `at`. Repeating it is a
    /// no-op.
    fn mark_published(&self, event_id: EventId, at: SystemTime) -> Result<(), StoreError>;

    /// Move a pending record to the terminal `Failed` state at `at`.
    fn mark_failed(&self, event_id: EventId, reason: &str, at: SystemTime) -> Result<(), StoreError>;

    /// Count one more publish attempt and return the new total.
    fn increment_attempt(&self, event_id: EventId, at: SystemTime) -> Result<u32, StoreError>;

    /// Record the error of the latest attempt without changing status.
    fn record_error(&self, event_id: EventId, error: &str) -> Result<(), StoreError>;

    /// Number of records per status.
    fn counts(&self) -> Result<OutboxCounts, StoreError>;

    /// Aggregates with a record in the `Failed` state. Their later records
    /// must wait until the failed one is requeued.
    fn failed_aggregates(&self) -> Result<HashSet<String>, StoreError>;
}
