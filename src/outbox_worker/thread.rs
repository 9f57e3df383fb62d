//! Background duty cycle for the event publisher.

use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};

use crate::bus::Publisher;
use crate::store::OutboxStore;

use super::publisher::EventPublisher;

/// Totals accumulated by a [`PublisherThread`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublisherStats {
    pub drains: usize,
    pub published: usize,
    pub failed: usize,
    pub deferred: usize,
    /// Drains aborted by a store error.
    pub store_errors: usize,
}

/// Runs [`EventPublisher::drain_once`] on its own thread until stopped.
///
/// A drain that found work is followed immediately by another; an idle
/// drain waits `poll_interval` first.
///
/// ```ignore
/// let worker = PublisherThread::spawn(EventPublisher::new(store.clone(), log.clone()));
/// // ... ledger writes stage events ...
/// let stats = worker.stop();
/// ```
pub struct PublisherThread {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<PublisherStats>>,
}

impl PublisherThread {
    pub fn spawn<S, P>(publisher: EventPublisher<S, P>) -> Self
    where
        S: OutboxStore + 'static,
        P: Publisher + 'static,
    {
        let (stop_tx, stop_rx) = channel();
        let poll_interval = publisher.config().poll_interval;

        let handle = thread::spawn(move || {
            let mut stats = PublisherStats::default();
            tracing::info!("outbox publisher started");

            loop {
                stats.drains += 1;
                let idle = match publisher.drain_once() {
                    Ok(report) => {
                        stats.published += report.published;
                        stats.failed += report.failed;
                        stats.deferred += report.deferred;
                        report.is_idle() || report.published + report.failed == 0
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "outbox drain aborted");
                        stats.store_errors += 1;
                        true
                    }
                };

                let wait = if idle { poll_interval } else { Default::default() };
                match stop_rx.recv_timeout(wait) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }

            tracing::info!(
                published = stats.published,
                failed = stats.failed,
                "outbox publisher stopped"
            );
            stats
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signal the thread to stop and wait for it to finish.
    pub fn stop(mut self) -> PublisherStats {
        let _ = self.stop_tx.send(());
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_default(),
            None => PublisherStats::default(),
        }
    }

    /// Signal the thread to stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for PublisherThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}
