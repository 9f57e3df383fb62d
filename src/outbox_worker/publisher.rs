use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::breaker::{CircuitBreaker, CircuitOpenError};
use crate::bus::{Message, PublishError, Publisher};
use crate::clock::{self, SharedClock};
use crate::envelope::EnvelopeCodec;
use crate::retry::{RetryError, RetryPolicy, Retryable};
use crate::store::{OutboxRecord, OutboxStore, StoreError};

/// Tuning for the publisher duty cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Records fetched per drain.
    pub batch_size: usize,
    /// Publish attempts a record gets, across all drains, before it is
    /// marked failed.
    pub max_attempts: u32,
    /// Idle wait between drains in [`PublisherThread`](super::PublisherThread).
    pub poll_interval: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_attempts: 5,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// What one drain did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub fetched: usize,
    pub published: usize,
    /// Records moved to `Failed` in this drain.
    pub failed: usize,
    /// Records left pending for a later drain (breaker open, or an earlier
    /// record of the same aggregate did not go out).
    pub deferred: usize,
}

impl DrainReport {
    pub fn is_idle(&self) -> bool {
        self.fetched == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordOutcome {
    Published,
    Failed,
    Deferred,
}

#[derive(Debug)]
enum AttemptError {
    Open(CircuitOpenError),
    Publish(PublishError),
    Store(StoreError),
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Open(e) => write!(f, "{}", e),
            AttemptError::Publish(e) => write!(f, "{}", e),
            AttemptError::Store(e) => write!(f, "{}", e),
        }
    }
}

/// Drains the outbox onto the log.
///
/// Each pending record is published with retry; broker acknowledgment
/// marks it published, a spent attempt budget or a non-retryable error
/// marks it failed. Records are handled in `fetch_publishable` order, and
/// once one record of an aggregate is held back the rest of that
/// aggregate's records wait too. A failed record keeps its aggregate out
/// of later batches until it is requeued; other aggregates keep flowing.
///
/// Delivery is at-least-once: a crash between publish and
/// `mark_published` republishes the same envelope, same event id.
pub struct EventPublisher<S, P> {
    store: S,
    publisher: P,
    codec: EnvelopeCodec,
    config: PublisherConfig,
    retry: RetryPolicy<PublishError>,
    breaker: Option<Arc<CircuitBreaker>>,
    clock: SharedClock,
}

impl<S, P> EventPublisher<S, P>
where
    S: OutboxStore,
    P: Publisher,
{
    pub fn new(store: S, publisher: P) -> Self {
        Self {
            store,
            publisher,
            codec: EnvelopeCodec::new(),
            config: PublisherConfig::default(),
            retry: RetryPolicy::new(),
            breaker: None,
            clock: clock::system(),
        }
    }

    pub fn with_config(mut self, config: PublisherConfig) -> Self {
        self.config = config;
        self
    }

    /// Backoff and classification of publish errors. The attempt budget
    /// comes from [`PublisherConfig::max_attempts`].
    pub fn with_retry_policy(mut self, policy: RetryPolicy<PublishError>) -> Self {
        self.retry = policy;
        self
    }

    /// Guard broker calls with `breaker`. While it is open, records stay
    /// pending and no attempt is counted.
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_codec(mut self, codec: EnvelopeCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Fetch one batch of pending records and try to publish each.
    ///
    /// Store failures abort the drain; records not reached stay pending.
    pub fn drain_once(&self) -> Result<DrainReport, StoreError> {
        // Aggregates behind a failed record are not fetched until it is requeued.
        let records = self.store.fetch_publishable(self.config.batch_size)?;
        let mut report = DrainReport {
            fetched: records.len(),
            ..DrainReport::default()
        };
        let mut held_back: HashSet<String> = HashSet::new();

        for record in records {
            if held_back.contains(record.aggregate_id()) {
                tracing::debug!(
                    event_id = %record.event_id(),
                    aggregate_id = record.aggregate_id(),
                    "deferred behind earlier record"
                );
                report.deferred += 1;
                continue;
            }

            match self.publish_record(&record)? {
                RecordOutcome::Published => report.published += 1,
                RecordOutcome::Failed => {
                    report.failed += 1;
                    held_back.insert(record.aggregate_id().to_string());
                }
                RecordOutcome::Deferred => {
                    report.deferred += 1;
                    held_back.insert(record.aggregate_id().to_string());
                }
            }
        }

        if !report.is_idle() {
            tracing::debug!(
                fetched = report.fetched,
                published = report.published,
                failed = report.failed,
                deferred = report.deferred,
                "outbox drained"
            );
        }
        Ok(report)
    }

    fn publish_record(&self, record: &OutboxRecord) -> Result<RecordOutcome, StoreError> {
        let event_id = record.event_id();

        let message = match Message::from_envelope(&self.codec, &record.event) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(%event_id, error = %err, "outbox record cannot be encoded");
                self.store
                    .mark_failed(event_id, &err.to_string(), self.clock.now())?;
                return Ok(RecordOutcome::Failed);
            }
        };

        let remaining = self.config.max_attempts.saturating_sub(record.attempt_count);
        if remaining == 0 {
            let reason = record
                .last_error
                .clone()
                .unwrap_or_else(|| "retry budget exhausted".to_string());
            self.store.mark_failed(event_id, &reason, self.clock.now())?;
            return Ok(RecordOutcome::Failed);
        }

        let policy = self
            .retry
            .adapt(|err: &AttemptError| match err {
                AttemptError::Publish(e) => Some(e),
                _ => None,
            })
            .with_max_attempts(remaining);

        let result = policy.execute(self.clock.as_ref(), |_| {
            let permit = match &self.breaker {
                Some(breaker) => Some(breaker.try_acquire().map_err(AttemptError::Open)?),
                None => None,
            };
            self.store
                .increment_attempt(event_id, self.clock.now())
                .map_err(AttemptError::Store)?;

            match self.publisher.publish(message.clone()) {
                Ok(()) => {
                    if let Some(permit) = permit {
                        permit.success();
                    }
                    Ok(())
                }
                Err(err) => {
                    if let Some(permit) = permit {
                        if err.is_retryable() {
                            permit.failure();
                        } else {
                            permit.success();
                        }
                    }
                    if let Err(store_err) = self.store.record_error(event_id, &err.to_string()) {
                        tracing::warn!(%event_id, error = %store_err, "could not record publish error");
                    }
                    Err(AttemptError::Publish(err))
                }
            }
        });

        match result {
            Ok(()) => {
                self.store.mark_published(event_id, self.clock.now())?;
                tracing::debug!(%event_id, aggregate_id = record.aggregate_id(), "event published");
                Ok(RecordOutcome::Published)
            }
            Err(RetryError::Permanent(AttemptError::Open(err))) => {
                tracing::debug!(%event_id, error = %err, "broker circuit open, record stays pending");
                Ok(RecordOutcome::Deferred)
            }
            Err(RetryError::Permanent(AttemptError::Store(err))) => Err(err),
            Err(err) => {
                let attempts = err.attempts();
                let reason = err.last_error().to_string();
                tracing::warn!(
                    %event_id,
                    aggregate_id = record.aggregate_id(),
                    ?attempts,
                    error = %reason,
                    "publish failed, outbox record marked failed"
                );
                self.store.mark_failed(event_id, &reason, self.clock.now())?;
                Ok(RecordOutcome::Failed)
            }
        }
    }
}
