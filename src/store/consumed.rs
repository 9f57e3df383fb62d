use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::envelope::EventId;

use super::error::StoreError;
use super::in_memory::Transaction;

/// Outcome of the most recent delivery of an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumedOutcome {
    Applied,
    IgnoredDuplicate,
}

/// Dedup record kept by the consuming service, one per event id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumedEntry {
    pub event_id: EventId,
    pub event_type: String,
    pub aggregate_id: String,
    pub consumed_at: SystemTime,
    pub last_outcome: ConsumedOutcome,
    /// Deliveries after the first, all of which were ignored.
    pub duplicate_deliveries: u32,
}

impl ConsumedEntry {
    pub fn applied(
        event_id: EventId,
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        consumed_at: SystemTime,
    ) -> Self {
        Self {
            event_id,
            event_type: event_type.into(),
            aggregate_id: aggregate_id.into(),
            consumed_at,
            last_outcome: ConsumedOutcome::Applied,
            duplicate_deliveries: 0,
        }
    }
}

/// The intelligence service's record of which events it has applied.
///
/// The dedup entry is written through the same [`Transaction`] as the
/// business effect, so either both land or neither does.
pub trait ConsumedEventLedger: Send + Sync {
    /// Open a unit of work for one delivery.
    fn begin(&self) -> Transaction;

    fn lookup(&self, event_id: EventId) -> Result<Option<ConsumedEntry>, StoreError>;

    /// Record `entry` inside `tx`.
    fn record_consumed(&self, tx: &mut Transaction, entry: ConsumedEntry) -> Result<(), StoreError>;

    /// Note that a later delivery of `event_id` was ignored.
    fn record_duplicate(&self, event_id: EventId) -> Result<(), StoreError>;
}
