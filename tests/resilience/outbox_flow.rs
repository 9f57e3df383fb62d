use std::sync::Arc;
use std::time::Duration;

use trackwise_resilience::bus::{InMemoryLog, PublishError};
use trackwise_resilience::clock::ManualClock;
use trackwise_resilience::envelope::EventEnvelope;
use trackwise_resilience::outbox_worker::{EventPublisher, PublisherConfig};
use trackwise_resilience::retry::RetryPolicy;
use trackwise_resilience::store::{InMemoryStore, OutboxStatus, OutboxStore, StoreError};

use crate::support::{init_tracing, record_entry, sequences_on_log, FlakyBroker, ENTRY_RECORDED};

fn publisher(
    store: &InMemoryStore,
    broker: &FlakyBroker,
    clock: &ManualClock,
    max_attempts: u32,
) -> EventPublisher<InMemoryStore, FlakyBroker> {
    EventPublisher::new(store.clone(), broker.clone())
        .with_config(PublisherConfig {
            batch_size: 50,
            max_attempts,
            poll_interval: Duration::from_millis(10),
        })
        .with_retry_policy(
            RetryPolicy::<PublishError>::new()
                .with_max_attempts(10)
                .with_base_delay(Duration::from_millis(10))
                .with_jitter(0.0),
        )
        .with_clock(Arc::new(clock.clone()))
}

#[test]
fn every_committed_mutation_has_exactly_one_outbox_record() {
    init_tracing();
    let store = InMemoryStore::new();

    for seq in 1..=3 {
        record_entry(&store, "acct-1", seq, 100 * seq as i64);
    }
    record_entry(&store, "acct-2", 1, -50);

    // Rolled back: neither the mutation nor the event may survive.
    {
        let mut tx = store.begin();
        tx.put("entry/acct-3/1", b"1".to_vec());
        store
            .stage_event(&mut tx, EventEnvelope::new(ENTRY_RECORDED, "acct-3", Vec::new()))
            .unwrap();
    }

    // Staging a duplicate id fails the whole transaction.
    let existing = store.outbox_records().unwrap()[0].event.clone();
    let mut tx = store.begin();
    tx.put("entry/acct-1/99", b"1".to_vec());
    assert_eq!(
        store.stage_event(&mut tx, existing.clone()),
        Err(StoreError::DuplicateEvent(existing.event_id()))
    );
    assert!(tx.commit().is_err());

    assert_eq!(store.record_count().unwrap(), 4);
    assert_eq!(store.outbox_records().unwrap().len(), 4);
    assert_eq!(store.get("entry/acct-3/1").unwrap(), None);
    assert_eq!(store.get("entry/acct-1/99").unwrap(), None);
    assert_eq!(store.counts().unwrap().pending, 4);
}

#[test]
fn per_aggregate_order_survives_broker_failures() {
    init_tracing();
    let clock = ManualClock::new();
    let store = InMemoryStore::new();
    let broker = FlakyBroker::new(InMemoryLog::new());

    for seq in 1..=3 {
        record_entry(&store, "acct-1", seq, 10);
        record_entry(&store, "acct-2", seq, 20);
    }
    broker.fail_next(2);

    let report = publisher(&store, &broker, &clock, 5).drain_once().unwrap();

    assert_eq!(report.published, 6);
    assert_eq!(broker.attempts(), 8);
    assert_eq!(sequences_on_log(&broker.log, "acct-1"), vec![1, 2, 3]);
    assert_eq!(sequences_on_log(&broker.log, "acct-2"), vec![1, 2, 3]);
    assert_eq!(store.counts().unwrap().published, 6);

    // The retried record kept its id and counted each attempt.
    let first = &store.outbox_records().unwrap()[0];
    assert_eq!(first.attempt_count, 3);
    assert_eq!(broker.log.messages_for_key("acct-1")[0].id, first.event_id().to_string());
}

#[test]
fn exhausted_record_holds_back_its_aggregate_until_requeued() {
    init_tracing();
    let clock = ManualClock::new();
    let store = InMemoryStore::new();
    let broker = FlakyBroker::new(InMemoryLog::new());

    let e1 = record_entry(&store, "acct-1", 1, 10);
    record_entry(&store, "acct-1", 2, 10);
    record_entry(&store, "acct-2", 1, 10);
    record_entry(&store, "acct-1", 3, 10);
    broker.fail_next(2);

    let publisher = publisher(&store, &broker, &clock, 2);
    let report = publisher.drain_once().unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.deferred, 2);
    assert_eq!(report.published, 1);

    let failed = store.failed().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].event_id(), e1.event_id());
    assert_eq!(failed[0].status, OutboxStatus::Failed);
    assert!(failed[0].last_error.as_deref().unwrap_or_default().contains("broker unreachable"));
    assert!(sequences_on_log(&broker.log, "acct-1").is_empty());

    // Later drains do not even fetch the blocked aggregate.
    let report = publisher.drain_once().unwrap();
    assert!(report.is_idle());
    assert_eq!(store.counts().unwrap().pending, 2);

    store.requeue(e1.event_id()).unwrap();
    let report = publisher.drain_once().unwrap();
    assert_eq!(report.published, 3);
    assert_eq!(sequences_on_log(&broker.log, "acct-1"), vec![1, 2, 3]);
    assert_eq!(store.counts().unwrap().failed, 0);
    assert_eq!(store.counts().unwrap().published, 4);
}

#[test]
fn blocked_backlog_larger_than_a_batch_does_not_starve_other_accounts() {
    init_tracing();
    let clock = ManualClock::new();
    let store = InMemoryStore::new();
    let broker = FlakyBroker::new(InMemoryLog::new());

    let e1 = record_entry(&store, "acct-1", 1, 10);
    for seq in 2..=4 {
        record_entry(&store, "acct-1", seq, 10);
    }
    record_entry(&store, "acct-2", 1, 20);
    broker.fail_next(1);

    let publisher = publisher(&store, &broker, &clock, 1).with_config(PublisherConfig {
        batch_size: 2,
        max_attempts: 1,
        poll_interval: Duration::from_millis(10),
    });

    let report = publisher.drain_once().unwrap();
    assert_eq!((report.fetched, report.failed, report.deferred), (2, 1, 1));

    for _ in 0..3 {
        publisher.drain_once().unwrap();
    }
    assert_eq!(sequences_on_log(&broker.log, "acct-2"), vec![1]);
    assert!(sequences_on_log(&broker.log, "acct-1").is_empty());
    assert_eq!(store.counts().unwrap().pending, 3);

    store.requeue(e1.event_id()).unwrap();
    while !publisher.drain_once().unwrap().is_idle() {}
    assert_eq!(sequences_on_log(&broker.log, "acct-1"), vec![1, 2, 3, 4]);
    assert_eq!(store.counts().unwrap().published, 5);
}
