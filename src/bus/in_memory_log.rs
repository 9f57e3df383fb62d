//! In-memory partitioned log for tests and single-process deployments.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard};
use std::time::{Duration, Instant};

use super::{Message, PublishError, Publisher, Subscribable, Subscriber};

/// Append-only log split into partitions by message key.
///
/// Clones share the log *and* the consumer group: several clones polling
/// concurrently split the partitions between them, and every message is
/// delivered to one of them. [`new_subscriber`](Subscribable::new_subscriber)
/// starts a separate group with its own offsets.
///
/// A partition with a message in flight is not polled again until that
/// message is acked or nacked, so per-key order survives redelivery.
///
/// ```
/// use trackwise_resilience::bus::{InMemoryLog, Message, Publisher, Subscriber};
///
/// let log = InMemoryLog::new();
/// log.publish(Message::new("evt-1", "acct-1", "EntryPosted", b"{}".to_vec())).unwrap();
///
/// let message = log.poll(10).unwrap().unwrap();
/// log.nack(&message.id, "not ready").unwrap();
///
/// let again = log.poll(10).unwrap().unwrap();
/// assert_eq!(again.id, "evt-1");
/// assert!(again.is_redelivery());
/// log.ack(&again.id).unwrap();
/// ```
#[derive(Clone)]
pub struct InMemoryLog {
    partitions: Arc<RwLock<Vec<Vec<Message>>>>,
    group: Arc<Mutex<GroupState>>,
}

struct GroupState {
    offsets: Vec<usize>,
    /// Message id -> (partition, message).
    in_flight: HashMap<String, (usize, Message)>,
    /// Nacked messages waiting to go out again, at most one per partition.
    redeliver: HashMap<usize, Message>,
    acked: Vec<String>,
    cursor: usize,
}

impl GroupState {
    fn new(partitions: usize) -> Self {
        Self {
            offsets: vec![0; partitions],
            in_flight: HashMap::new(),
            redeliver: HashMap::new(),
            acked: Vec::new(),
            cursor: 0,
        }
    }

    fn busy(&self, partition: usize) -> bool {
        self.in_flight.values().any(|(p, _)| *p == partition)
    }
}

impl Default for InMemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLog {
    pub const DEFAULT_PARTITIONS: usize = 4;

    pub fn new() -> Self {
        Self::with_partitions(Self::DEFAULT_PARTITIONS)
    }

    pub fn with_partitions(count: usize) -> Self {
        let count = count.max(1);
        Self {
            partitions: Arc::new(RwLock::new(vec![Vec::new(); count])),
            group: Arc::new(Mutex::new(GroupState::new(count))),
        }
    }

    pub fn partition_count(&self) -> usize {
        self.read_log().map(|log| log.len()).unwrap_or(0)
    }

    /// Partition a key is routed to.
    pub fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.partition_count().max(1) as u64) as usize
    }

    /// Every message on the log, partition by partition.
    pub fn messages(&self) -> Vec<Message> {
        self.read_log()
            .map(|log| log.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Messages with `key`, in log order.
    pub fn messages_for_key(&self, key: &str) -> Vec<Message> {
        let partition = self.partition_for(key);
        self.read_log()
            .map(|log| {
                log[partition]
                    .iter()
                    .filter(|m| m.key == key)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.read_log()
            .map(|log| log.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids acknowledged by this consumer group, in ack order.
    pub fn acknowledged(&self) -> Vec<String> {
        self.lock_group()
            .map(|group| group.acked.clone())
            .unwrap_or_default()
    }

    /// Messages delivered to this group and not yet acked or nacked.
    pub fn in_flight(&self) -> usize {
        self.lock_group()
            .map(|group| group.in_flight.len())
            .unwrap_or(0)
    }

    fn next_message(&self) -> Result<Option<Message>, PublishError> {
        let log = self.read_log()?;
        let mut group = self.lock_group()?;
        let count = log.len();

        for step in 0..count {
            let partition = (group.cursor + step) % count;
            if group.busy(partition) {
                continue;
            }

            let mut message = match group.redeliver.remove(&partition) {
                Some(message) => message,
                None => {
                    let offset = group.offsets[partition];
                    match log[partition].get(offset) {
                        Some(message) => {
                            group.offsets[partition] += 1;
                            message.clone()
                        }
                        None => continue,
                    }
                }
            };

            message.delivery_count += 1;
            group
                .in_flight
                .insert(message.id.clone(), (partition, message.clone()));
            group.cursor = (partition + 1) % count;
            return Ok(Some(message));
        }
        Ok(None)
    }

    fn read_log(&self) -> Result<RwLockReadGuard<'_, Vec<Vec<Message>>>, PublishError> {
        self.partitions
            .read()
            .map_err(|_| PublishError::LockPoisoned("log"))
    }

    fn lock_group(&self) -> Result<MutexGuard<'_, GroupState>, PublishError> {
        self.group
            .lock()
            .map_err(|_| PublishError::LockPoisoned("consumer group"))
    }
}

impl Publisher for InMemoryLog {
    fn publish(&self, message: Message) -> Result<(), PublishError> {
        let partition = self.partition_for(&message.key);
        let mut log = self
            .partitions
            .write()
            .map_err(|_| PublishError::LockPoisoned("log"))?;
        tracing::debug!(id = %message.id, key = %message.key, partition, "message appended");
        log[partition].push(message);
        Ok(())
    }
}

impl Subscriber for InMemoryLog {
    fn poll(&self, timeout_ms: u64) -> Result<Option<Message>, PublishError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);

        loop {
            if let Some(message) = self.next_message()? {
                return Ok(Some(message));
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }

            // Small sleep to avoid busy-waiting
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn ack(&self, message_id: &str) -> Result<(), PublishError> {
        let mut group = self.lock_group()?;
        match group.in_flight.remove(message_id) {
            Some(_) => {
                group.acked.push(message_id.to_string());
                Ok(())
            }
            None => Err(PublishError::UnknownDelivery(message_id.to_string())),
        }
    }

    fn nack(&self, message_id: &str, reason: &str) -> Result<(), PublishError> {
        let mut group = self.lock_group()?;
        match group.in_flight.remove(message_id) {
            Some((partition, message)) => {
                tracing::debug!(id = message_id, reason, "message nacked for redelivery");
                group.redeliver.insert(partition, message);
                Ok(())
            }
            None => Err(PublishError::UnknownDelivery(message_id.to_string())),
        }
    }
}

impl Subscribable for InMemoryLog {
    fn new_subscriber(&self) -> Self {
        let partitions = self.partition_count();
        Self {
            partitions: Arc::clone(&self.partitions),
            group: Arc::new(Mutex::new(GroupState::new(partitions))),
        }
    }
}
