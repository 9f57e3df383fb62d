use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::envelope::{EventEnvelope, EventId};

use super::consumed::{ConsumedEntry, ConsumedEventLedger, ConsumedOutcome};
use super::error::StoreError;
use super::outbox::{OutboxCounts, OutboxRecord, OutboxStatus, OutboxStore};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    records: HashMap<String, Vec<u8>>,
    outbox: BTreeMap<u64, OutboxRecord>,
    outbox_index: HashMap<EventId, u64>,
    next_sequence: u64,
    consumed: HashMap<EventId, ConsumedEntry>,
    commits: u64,
}

impl StoreState {
    fn outbox_record_mut(&mut self, event_id: EventId) -> Result<&mut OutboxRecord, StoreError> {
        let sequence = *self
            .outbox_index
            .get(&event_id)
            .ok_or(StoreError::UnknownEvent(event_id))?;
        self.outbox
            .get_mut(&sequence)
            .ok_or(StoreError::UnknownEvent(event_id))
    }

    fn failed_aggregates(&self) -> HashSet<&str> {
        self.outbox
            .values()
            .filter(|r| r.is_failed())
            .map(|r| r.aggregate_id())
            .collect()
    }
}

/// In-memory transactional store.
///
/// Holds service state records, the outbox and the consumed-event ledger
/// behind one lock, so a [`Transaction`] commit applies all of its parts
/// or none of them. Each service owns its own instance; cloning yields
/// another handle to the same storage.
///
/// ```
/// use trackwise_resilience::envelope::EventEnvelope;
/// use trackwise_resilience::store::{InMemoryStore, OutboxStore};
///
/// let store = InMemoryStore::new();
/// let mut tx = store.begin();
/// tx.put("acct-1", b"balance=100".to_vec());
/// store.stage_event(&mut tx, EventEnvelope::new("EntryPosted", "acct-1", Vec::new())).unwrap();
/// tx.commit().unwrap();
///
/// assert_eq!(store.fetch_pending(10).unwrap().len(), 1);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a unit of work.
    pub fn begin(&self) -> Transaction {
        Transaction {
            state: Arc::clone(&self.state),
            writes: Vec::new(),
            staged: Vec::new(),
            consumed: Vec::new(),
            aborted: None,
        }
    }

    /// Read a committed state record.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;
        Ok(state.records.get(key).cloned())
    }

    /// Number of committed state records.
    pub fn record_count(&self) -> Result<usize, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;
        Ok(state.records.len())
    }

    /// Number of successful commits.
    pub fn commit_count(&self) -> Result<u64, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;
        Ok(state.commits)
    }

    /// Look up one outbox record by event id.
    pub fn outbox_record(&self, event_id: EventId) -> Result<Option<OutboxRecord>, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;
        Ok(state
            .outbox_index
            .get(&event_id)
            .and_then(|seq| state.outbox.get(seq))
            .cloned())
    }

    /// All outbox records in commit order.
    pub fn outbox_records(&self) -> Result<Vec<OutboxRecord>, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;
        Ok(state.outbox.values().cloned().collect())
    }

    /// Records whose retry budget ran out, oldest first.
    pub fn failed(&self) -> Result<Vec<OutboxRecord>, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;
        Ok(state
            .outbox
            .values()
            .filter(|r| r.is_failed())
            .cloned()
            .collect())
    }

    /// Operator remediation: put a failed record back in the publish queue.
    ///
    /// The record keeps its original sequence, so it is published ahead of
    /// anything staged after it.
    pub fn requeue(&self, event_id: EventId) -> Result<(), StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::LockPoisoned("write"))?;
        let record = state.outbox_record_mut(event_id)?;
        if record.status != OutboxStatus::Failed {
            return Err(StoreError::InvalidTransition {
                event_id,
                from: record.status,
                to: OutboxStatus::Pending,
            });
        }
        record.status = OutboxStatus::Pending;
        record.attempt_count = 0;
        record.failed_at = None;
        tracing::info!(%event_id, "outbox record requeued");
        Ok(())
    }

    /// Serialize the whole store (bitcode) so it can be restored after a
    /// simulated restart.
    pub fn snapshot(&self) -> Result<Vec<u8>, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;
        bitcode::serialize(&*state).map_err(|e| StoreError::Snapshot(e.to_string()))
    }

    /// Rebuild a store from [`snapshot`](Self::snapshot) bytes.
    pub fn restore(bytes: &[u8]) -> Result<Self, StoreError> {
        let state: StoreState =
            bitcode::deserialize(bytes).map_err(|e| StoreError::Snapshot(e.to_string()))?;
        Ok(Self {
            state: Arc::new(RwLock::new(state)),
        })
    }
}

enum Write {
    Put(String, Vec<u8>),
    Delete(String),
}

/// A unit of work against an [`InMemoryStore`].
///
/// Writes, staged events and dedup entries are buffered until
/// [`commit`](Transaction::commit). Dropping the transaction without
/// committing discards everything. Once any staging step fails the
/// transaction is aborted and `commit` refuses to apply it.
pub struct Transaction {
    state: Arc<RwLock<StoreState>>,
    writes: Vec<Write>,
    staged: Vec<EventEnvelope>,
    consumed: Vec<ConsumedEntry>,
    aborted: Option<StoreError>,
}

impl Transaction {
    pub fn put(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.writes.push(Write::Put(key.into(), value));
    }

    pub fn delete(&mut self, key: impl Into<String>) {
        self.writes.push(Write::Delete(key.into()));
    }

    /// Read a record as this transaction would see it after commit.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        for write in self.writes.iter().rev() {
            match write {
                Write::Put(k, v) if k == key => return Ok(Some(v.clone())),
                Write::Delete(k) if k == key => return Ok(None),
                _ => {}
            }
        }
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;
        Ok(state.records.get(key).cloned())
    }

    /// Events staged so far, in staging order.
    pub fn staged(&self) -> &[EventEnvelope] {
        &self.staged
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    /// Mark the transaction as failed; `commit` will return `reason`.
    pub fn abort(&mut self, reason: StoreError) {
        if self.aborted.is_none() {
            self.aborted = Some(reason);
        }
    }

    pub(crate) fn stage(&mut self, event: EventEnvelope) -> Result<(), StoreError> {
        if let Some(err) = &self.aborted {
            return Err(err.clone());
        }
        let event_id = event.event_id();
        let already_staged = self.staged.iter().any(|e| e.event_id() == event_id);
        let already_stored = {
            let state = self
                .state
                .read()
                .map_err(|_| StoreError::LockPoisoned("read"))?;
            state.outbox_index.contains_key(&event_id)
        };
        if already_staged || already_stored {
            let err = StoreError::DuplicateEvent(event_id);
            self.abort(err.clone());
            return Err(err);
        }
        self.staged.push(event);
        Ok(())
    }

    pub(crate) fn record(&mut self, entry: ConsumedEntry) -> Result<(), StoreError> {
        if let Some(err) = &self.aborted {
            return Err(err.clone());
        }
        if self.consumed.iter().any(|e| e.event_id == entry.event_id) {
            let err = StoreError::AlreadyConsumed(entry.event_id);
            self.abort(err.clone());
            return Err(err);
        }
        self.consumed.push(entry);
        Ok(())
    }

    /// Apply every buffered change atomically.
    ///
    /// Staged event ids and dedup entries are re-checked under the write
    /// lock; a conflict rejects the whole transaction.
    pub fn commit(self) -> Result<(), StoreError> {
        if let Some(err) = self.aborted {
            return Err(err);
        }

        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::LockPoisoned("commit"))?;

        let mut seen = HashSet::new();
        for event in &self.staged {
            let id = event.event_id();
            if state.outbox_index.contains_key(&id) || !seen.insert(id) {
                return Err(StoreError::DuplicateEvent(id));
            }
        }
        for entry in &self.consumed {
            if state.consumed.contains_key(&entry.event_id) {
                return Err(StoreError::AlreadyConsumed(entry.event_id));
            }
        }

        for write in self.writes {
            match write {
                Write::Put(key, value) => {
                    state.records.insert(key, value);
                }
                Write::Delete(key) => {
                    state.records.remove(&key);
                }
            }
        }

        for event in self.staged {
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.outbox_index.insert(event.event_id(), sequence);
            state.outbox.insert(sequence, OutboxRecord::staged(sequence, event));
        }

        for entry in self.consumed {
            state.consumed.insert(entry.event_id, entry);
        }

        state.commits += 1;
        Ok(())
    }
}

impl OutboxStore for InMemoryStore {
    fn stage_event(&self, tx: &mut Transaction, event: EventEnvelope) -> Result<(), StoreError> {
        if !Arc::ptr_eq(&self.state, &tx.state) {
            let err = StoreError::Aborted("transaction belongs to another store".into());
            tx.abort(err.clone());
            return Err(err);
        }
        tx.stage(event)
    }

    fn fetch_pending(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;
        Ok(state
            .outbox
            .values()
            .filter(|r| r.is_pending())
            .take(limit)
            .cloned()
            .collect())
    }

    fn fetch_publishable(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;
        let blocked = state.failed_aggregates();
        Ok(state
            .outbox
            .values()
            .filter(|r| r.is_pending() && !blocked.contains(r.aggregate_id()))
            .take(limit)
            .cloned()
            .collect())
    }

    fn mark_published(&self, event_id: EventId, at: SystemTime) -> Result<(), StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::LockPoisoned("write"))?;
        let record = state.outbox_record_mut(event_id)?;
        match record.status {
            OutboxStatus::Published => Ok(()),
            OutboxStatus::Pending => {
                record.status = OutboxStatus::Published;
                record.published_at = Some(at);
                record.last_error = None;
                Ok(())
            }
            OutboxStatus::Failed => Err(StoreError::InvalidTransition {
                event_id,
                from: OutboxStatus::Failed,
                to: OutboxStatus::Published,
            }),
        }
    }

    fn mark_failed(&self, event_id: EventId, reason: &str, at: SystemTime) -> Result<(), StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::LockPoisoned("write"))?;
        let record = state.outbox_record_mut(event_id)?;
        match record.status {
            OutboxStatus::Failed => Ok(()),
            OutboxStatus::Pending => {
                record.status = OutboxStatus::Failed;
                record.failed_at = Some(at);
                record.last_error = Some(reason.to_string());
                Ok(())
            }
            OutboxStatus::Published => Err(StoreError::InvalidTransition {
                event_id,
                from: OutboxStatus::Published,
                to: OutboxStatus::Failed,
            }),
        }
    }

    fn increment_attempt(&self, event_id: EventId, at: SystemTime) -> Result<u32, StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::LockPoisoned("write"))?;
        let record = state.outbox_record_mut(event_id)?;
        if !record.is_pending() {
            return Err(StoreError::InvalidTransition {
                event_id,
                from: record.status,
                to: OutboxStatus::Pending,
            });
        }
        record.attempt_count += 1;
        record.last_attempt_at = Some(at);
        Ok(record.attempt_count)
    }

    fn record_error(&self, event_id: EventId, error: &str) -> Result<(), StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::LockPoisoned("write"))?;
        let record = state.outbox_record_mut(event_id)?;
        record.last_error = Some(error.to_string());
        Ok(())
    }

    fn counts(&self) -> Result<OutboxCounts, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;
        let mut counts = OutboxCounts::default();
        for record in state.outbox.values() {
            match record.status {
                OutboxStatus::Pending => counts.pending += 1,
                OutboxStatus::Published => counts.published += 1,
                OutboxStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    fn failed_aggregates(&self) -> Result<HashSet<String>, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;
        Ok(state
            .failed_aggregates()
            .into_iter()
            .map(str::to_string)
            .collect())
    }
}

impl ConsumedEventLedger for InMemoryStore {
    fn begin(&self) -> Transaction {
        InMemoryStore::begin(self)
    }

    fn lookup(&self, event_id: EventId) -> Result<Option<ConsumedEntry>, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;
        Ok(state.consumed.get(&event_id).cloned())
    }

    fn record_consumed(&self, tx: &mut Transaction, entry: ConsumedEntry) -> Result<(), StoreError> {
        if !Arc::ptr_eq(&self.state, &tx.state) {
            let err = StoreError::Aborted("transaction belongs to another store".into());
            tx.abort(err.clone());
            return Err(err);
        }
        tx.record(entry)
    }

    fn record_duplicate(&self, event_id: EventId) -> Result<(), StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::LockPoisoned("write"))?;
        if let Some(entry) = state.consumed.get_mut(&event_id) {
            entry.duplicate_deliveries += 1;
            entry.last_outcome = ConsumedOutcome::IgnoredDuplicate;
        }
        Ok(())
    }
}
