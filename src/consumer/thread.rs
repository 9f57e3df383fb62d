//! Background consume loop for the intelligence side.

use std::sync::mpsc::{channel, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::bus::{Message, Subscriber};
use crate::clock::Clock;
use crate::store::ConsumedEventLedger;

use super::dead_letter::{DeadLetter, DeadLetterSink};
use super::error::{ConsumeOutcome, ProcessingError};
use super::handler::EventHandler;
use super::idempotent::IdempotentConsumer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// How long one poll of the log may block.
    pub poll_timeout: Duration,
    /// Pause before nacking a transient failure, so redelivery is not
    /// immediate.
    pub redelivery_delay: Duration,
    /// Dead-letter a transiently failing message once it has been
    /// delivered this many times. `None` keeps redelivering.
    pub max_deliveries: Option<u32>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(100),
            redelivery_delay: Duration::from_millis(50),
            max_deliveries: None,
        }
    }
}

/// Totals accumulated by a [`ConsumerThread`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: usize,
    pub applied: usize,
    pub ignored: usize,
    pub redelivered: usize,
    pub dead_lettered: usize,
    /// Poll, ack or dead-letter operations that failed.
    pub errors: usize,
}

/// Polls a [`Subscriber`], applies each message through an
/// [`IdempotentConsumer`] and settles it on the log:
///
/// | outcome              | log action                 |
/// |----------------------|----------------------------|
/// | applied / ignored    | ack                        |
/// | transient failure    | nack (redelivered)         |
/// | permanent failure    | dead-letter, then ack      |
pub struct ConsumerThread {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<ConsumerStats>>,
}

impl ConsumerThread {
    pub fn spawn<S, L, H, D>(
        subscriber: S,
        consumer: IdempotentConsumer<L, H>,
        dead_letters: D,
        config: ConsumerConfig,
    ) -> Self
    where
        S: Subscriber + 'static,
        L: ConsumedEventLedger + 'static,
        H: EventHandler + 'static,
        D: DeadLetterSink + 'static,
    {
        let (stop_tx, stop_rx) = channel::<()>();

        let handle = thread::spawn(move || {
            let mut stats = ConsumerStats::default();
            let poll_ms = config.poll_timeout.as_millis() as u64;
            tracing::info!("event consumer started");

            loop {
                match stop_rx.try_recv() {
                    Ok(()) | Err(TryRecvError::Disconnected) => break,
                    Err(TryRecvError::Empty) => {}
                }

                let message = match subscriber.poll(poll_ms) {
                    Ok(Some(message)) => message,
                    Ok(None) => continue,
                    Err(err) => {
                        tracing::warn!(error = %err, "poll failed");
                        stats.errors += 1;
                        match stop_rx.recv_timeout(config.poll_timeout) {
                            Err(RecvTimeoutError::Timeout) => continue,
                            _ => break,
                        }
                    }
                };

                stats.received += 1;
                let outcome = consumer.on_message(&message);
                let delay = settle(
                    &subscriber,
                    &dead_letters,
                    &config,
                    consumer.clock().as_ref(),
                    &message,
                    outcome,
                    &mut stats,
                );

                if let Some(delay) = delay {
                    match stop_rx.recv_timeout(delay) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => {
                            let _ = subscriber.nack(&message.id, "consumer stopping");
                            break;
                        }
                    }
                    if let Err(err) = subscriber.nack(&message.id, "transient failure") {
                        tracing::warn!(message_id = %message.id, error = %err, "nack failed");
                        stats.errors += 1;
                    }
                }
            }

            tracing::info!(
                applied = stats.applied,
                ignored = stats.ignored,
                dead_lettered = stats.dead_lettered,
                "event consumer stopped"
            );
            stats
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signal the thread to stop and wait for it to finish.
    pub fn stop(mut self) -> ConsumerStats {
        let _ = self.stop_tx.send(());
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_default(),
            None => ConsumerStats::default(),
        }
    }

    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for ConsumerThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

/// Settle one delivery. Returns the wait before a nack when the message
/// must be redelivered.
fn settle<S, D>(
    subscriber: &S,
    dead_letters: &D,
    config: &ConsumerConfig,
    clock: &dyn Clock,
    message: &Message,
    outcome: ConsumeOutcome,
    stats: &mut ConsumerStats,
) -> Option<Duration>
where
    S: Subscriber,
    D: DeadLetterSink,
{
    let reason = match outcome {
        ConsumeOutcome::Applied => {
            stats.applied += 1;
            ack(subscriber, message, stats);
            return None;
        }
        ConsumeOutcome::Ignored(_) => {
            stats.ignored += 1;
            ack(subscriber, message, stats);
            return None;
        }
        ConsumeOutcome::Failed(ProcessingError::Transient(reason)) => {
            let exhausted = config
                .max_deliveries
                .map_or(false, |max| message.delivery_count >= max);
            if !exhausted {
                tracing::warn!(
                    message_id = %message.id,
                    delivery = message.delivery_count,
                    reason = %reason,
                    "transient failure, message will be redelivered"
                );
                stats.redelivered += 1;
                return Some(config.redelivery_delay);
            }
            format!("gave up after {} deliveries: {}", message.delivery_count, reason)
        }
        ConsumeOutcome::Failed(ProcessingError::Permanent(reason)) => reason,
    };

    let letter = DeadLetter::from_message(message, reason, clock.now());
    match dead_letters.dead_letter(letter) {
        Ok(()) => {
            stats.dead_lettered += 1;
            ack(subscriber, message, stats);
            None
        }
        Err(err) => {
            // Not stored anywhere yet; keep it on the log.
            tracing::warn!(message_id = %message.id, error = %err, "dead-letter failed");
            stats.errors += 1;
            Some(config.redelivery_delay)
        }
    }
}

fn ack<S: Subscriber>(subscriber: &S, message: &Message, stats: &mut ConsumerStats) {
    if let Err(err) = subscriber.ack(&message.id) {
        tracing::warn!(message_id = %message.id, error = %err, "ack failed");
        stats.errors += 1;
    }
}
