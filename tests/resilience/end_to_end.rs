use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use trackwise_resilience::breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use trackwise_resilience::bus::{InMemoryLog, Message, Publisher, Subscriber};
use trackwise_resilience::consumer::{
    ConsumeOutcome, ConsumerConfig, ConsumerThread, DeadLetterSink, DuplicateReason,
    IdempotentConsumer, InMemoryDeadLetters, ProcessingError,
};
use trackwise_resilience::envelope::EventEnvelope;
use trackwise_resilience::health::{HealthCheck, HealthStatus};
use trackwise_resilience::outbox_worker::{EventPublisher, PublisherConfig, PublisherThread};
use trackwise_resilience::store::{ConsumedEventLedger, ConsumedOutcome, InMemoryStore, OutboxStore, Transaction};

use crate::support::{init_tracing, record_entry, wait_until, EntryRecorded};

/// Intelligence-side effect: fold each entry into a running balance.
fn apply_entry(event: &EventEnvelope, tx: &mut Transaction) -> Result<(), ProcessingError> {
    let entry: EntryRecorded = event
        .decode_payload()
        .map_err(|e| ProcessingError::permanent(e.to_string()))?;
    let key = format!("balance/{}", entry.account);
    let current = tx
        .get(&key)?
        .map(|bytes| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[..8]);
            i64::from_le_bytes(raw)
        })
        .unwrap_or(0);
    tx.put(key, (current + entry.amount_cents).to_le_bytes().to_vec());
    Ok(())
}

fn balance(store: &InMemoryStore, account: &str) -> i64 {
    store
        .get(&format!("balance/{}", account))
        .unwrap()
        .map(|bytes| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[..8]);
            i64::from_le_bytes(raw)
        })
        .unwrap_or(0)
}

#[test]
fn republish_after_crash_is_applied_once() {
    init_tracing();
    let ledger = InMemoryStore::new();
    let log = InMemoryLog::new();
    let event = record_entry(&ledger, "acct-1", 1, 250);

    // The broker acknowledges the publish, then the process dies before
    // mark_published is durable: on restart the record is still pending.
    let before_ack = ledger.snapshot().unwrap();
    EventPublisher::new(ledger.clone(), log.clone()).drain_once().unwrap();
    let restarted = InMemoryStore::restore(&before_ack).unwrap();
    assert_eq!(restarted.counts().unwrap().pending, 1);

    let report = EventPublisher::new(restarted.clone(), log.clone()).drain_once().unwrap();
    assert_eq!(report.published, 1);
    assert_eq!(log.len(), 2);

    let intelligence = InMemoryStore::new();
    let consumer = IdempotentConsumer::new(intelligence.clone(), apply_entry);
    let mut outcomes = Vec::new();
    while let Some(message) = log.poll(10).unwrap() {
        assert_eq!(message.id, event.event_id().to_string());
        outcomes.push(consumer.on_message(&message));
        log.ack(&message.id).unwrap();
    }

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0], ConsumeOutcome::Applied);
    assert!(matches!(
        outcomes[1],
        ConsumeOutcome::Ignored(DuplicateReason::AlreadyConsumed { .. })
    ));
    assert_eq!(balance(&intelligence, "acct-1"), 250);

    let entry = intelligence.lookup(event.event_id()).unwrap().unwrap();
    assert_eq!(entry.last_outcome, ConsumedOutcome::IgnoredDuplicate);
    assert_eq!(entry.duplicate_deliveries, 1);
}

#[test]
fn background_publisher_and_consumer_converge() {
    init_tracing();
    let ledger = InMemoryStore::new();
    let intelligence = InMemoryStore::new();
    let log = InMemoryLog::new();
    let dead_letters = InMemoryDeadLetters::new();

    // One transient failure on the first delivery of acct-1's second entry.
    let failed_once = Arc::new(AtomicBool::new(false));
    let applied: Arc<Mutex<Vec<(String, u32)>>> = Arc::default();
    let handler = {
        let failed_once = Arc::clone(&failed_once);
        let applied = Arc::clone(&applied);
        move |event: &EventEnvelope, tx: &mut Transaction| -> Result<(), ProcessingError> {
            let entry: EntryRecorded = event
                .decode_payload()
                .map_err(|e| ProcessingError::permanent(e.to_string()))?;
            if entry.account == "acct-1" && entry.sequence == 2 && !failed_once.swap(true, Ordering::SeqCst) {
                return Err(ProcessingError::transient("projection store busy"));
            }
            apply_entry(event, tx)?;
            applied.lock().unwrap().push((entry.account, entry.sequence));
            Ok(())
        }
    };

    let consumer = ConsumerThread::spawn(
        log.clone(),
        IdempotentConsumer::new(intelligence.clone(), handler),
        dead_letters.clone(),
        ConsumerConfig {
            poll_timeout: Duration::from_millis(10),
            redelivery_delay: Duration::from_millis(5),
            max_deliveries: None,
        },
    );
    let publisher = PublisherThread::spawn(
        EventPublisher::new(ledger.clone(), log.clone()).with_config(PublisherConfig {
            batch_size: 2,
            max_attempts: 3,
            poll_interval: Duration::from_millis(5),
        }),
    );

    for seq in 1..=3 {
        record_entry(&ledger, "acct-1", seq, 100);
        record_entry(&ledger, "acct-2", seq, -10);
    }

    assert!(wait_until(Duration::from_secs(5), || applied.lock().unwrap().len() == 6));
    let publisher_stats = publisher.stop();
    let consumer_stats = consumer.stop();

    assert_eq!(publisher_stats.published, 6);
    assert_eq!(consumer_stats.applied, 6);
    assert_eq!(consumer_stats.redelivered, 1);
    assert_eq!(dead_letters.count().unwrap(), 0);
    assert_eq!(ledger.counts().unwrap().published, 6);
    assert_eq!(balance(&intelligence, "acct-1"), 300);
    assert_eq!(balance(&intelligence, "acct-2"), -30);

    let applied = applied.lock().unwrap();
    let order = |account: &str| -> Vec<u32> {
        applied
            .iter()
            .filter(|(a, _)| a == account)
            .map(|(_, seq)| *seq)
            .collect()
    };
    assert_eq!(order("acct-1"), vec![1, 2, 3]);
    assert_eq!(order("acct-2"), vec![1, 2, 3]);
}

#[test]
fn malformed_event_is_dead_lettered_and_reported() {
    init_tracing();
    let intelligence = InMemoryStore::new();
    let log = InMemoryLog::new();
    let dead_letters = InMemoryDeadLetters::new();

    log.publish(Message::new("m-1", "acct-1", "ledger.entry_recorded", b"not an envelope".to_vec()))
        .unwrap();

    let consumer = ConsumerThread::spawn(
        log.clone(),
        IdempotentConsumer::new(intelligence.clone(), apply_entry),
        dead_letters.clone(),
        ConsumerConfig {
            poll_timeout: Duration::from_millis(10),
            ..ConsumerConfig::default()
        },
    );
    assert!(wait_until(Duration::from_secs(5), || dead_letters.count().unwrap() == 1));
    let stats = consumer.stop();

    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(log.acknowledged(), vec!["m-1".to_string()]);
    assert_eq!(intelligence.record_count().unwrap(), 0);

    let letter = &dead_letters.letters().unwrap()[0];
    assert_eq!(letter.message_id, "m-1");
    assert_eq!(letter.payload, b"not an envelope".to_vec());

    let registry = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default()));
    let report = HealthCheck::new(registry)
        .with_dead_letters(Arc::new(dead_letters))
        .report()
        .unwrap();
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.dead_letters, Some(1));
}
