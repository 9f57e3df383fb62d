//! Shared fixtures: a ledger-side write path, a broker that can be made to
//! fail, and tracing setup.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use trackwise_resilience::bus::{InMemoryLog, Message, PublishError, Publisher};
use trackwise_resilience::envelope::EventEnvelope;
use trackwise_resilience::store::{InMemoryStore, OutboxStore};

pub const ENTRY_RECORDED: &str = "ledger.entry_recorded";

/// Install a test subscriber once. `RUST_LOG=trackwise_resilience=debug`
/// shows breaker and publisher activity.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Payload of `ledger.entry_recorded`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRecorded {
    pub account: String,
    pub sequence: u32,
    pub amount_cents: i64,
}

/// The ledger write path: record an entry and stage its event in one
/// transaction.
pub fn record_entry(store: &InMemoryStore, account: &str, sequence: u32, amount_cents: i64) -> EventEnvelope {
    let entry = EntryRecorded {
        account: account.to_string(),
        sequence,
        amount_cents,
    };
    let event = EventEnvelope::encode_payload(ENTRY_RECORDED, account, &entry)
        .unwrap()
        .with_correlation_id(format!("req-{}-{}", account, sequence));

    let mut tx = store.begin();
    tx.put(
        format!("entry/{}/{}", account, sequence),
        amount_cents.to_le_bytes().to_vec(),
    );
    store.stage_event(&mut tx, event.clone()).unwrap();
    tx.commit().unwrap();
    event
}

/// Delegates to an [`InMemoryLog`] after failing a set number of publishes
/// with a connection error.
#[derive(Clone)]
pub struct FlakyBroker {
    pub log: InMemoryLog,
    failures_left: Arc<AtomicU32>,
    attempts: Arc<AtomicUsize>,
}

impl FlakyBroker {
    pub fn new(log: InMemoryLog) -> Self {
        Self {
            log,
            failures_left: Arc::new(AtomicU32::new(0)),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Publisher for FlakyBroker {
    fn publish(&self, message: Message) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PublishError::ConnectionFailed("broker unreachable".into()));
        }
        self.log.publish(message)
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Sequence numbers of the `ledger.entry_recorded` events for `account`,
/// in log order.
pub fn sequences_on_log(log: &InMemoryLog, account: &str) -> Vec<u32> {
    let codec = trackwise_resilience::envelope::EnvelopeCodec::new();
    log.messages_for_key(account)
        .iter()
        .map(|m| {
            codec
                .decode(&m.payload)
                .unwrap()
                .decode_payload::<EntryRecorded>()
                .unwrap()
                .sequence
        })
        .collect()
}
