use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::clock::Clock;

use super::backoff::Backoff;
use super::error::{RetryError, Retryable};

type Predicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Bounded retries with capped exponential backoff and down-jitter.
///
/// Only errors accepted by the predicate are retried; anything else is
/// returned at once as [`RetryError::Permanent`].
pub struct RetryPolicy<E> {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: f64,
    predicate: Predicate<E>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            jitter: self.jitter,
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl<E: Retryable + 'static> RetryPolicy<E> {
    /// Three attempts, 100ms doubling to at most 5s, 20% jitter, retrying
    /// whatever [`Retryable::is_retryable`] accepts.
    pub fn new() -> Self {
        Self::with_predicate(|e: &E| e.is_retryable())
    }
}

impl<E: Retryable + 'static> Default for RetryPolicy<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> RetryPolicy<E> {
    pub fn with_predicate<P>(predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: 0.2,
            predicate: Arc::new(predicate),
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self::with_predicate(|_| false).with_max_attempts(1)
    }

    /// Total attempts including the first. At least one.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Fraction in `[0, 1]` by which a delay may be shortened at random.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Replace the retryable-error predicate.
    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.predicate = Arc::new(predicate);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    pub fn should_retry(&self, error: &E) -> bool {
        (self.predicate)(error)
    }

    /// The same schedule applied to a wrapping error type. Errors that
    /// `project` cannot map back to `E` are never retried.
    pub fn adapt<F, P>(&self, project: P) -> RetryPolicy<F>
    where
        E: 'static,
        P: Fn(&F) -> Option<&E> + Send + Sync + 'static,
    {
        let predicate = Arc::clone(&self.predicate);
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            jitter: self.jitter,
            predicate: Arc::new(move |err: &F| project(err).map_or(false, |inner| predicate(inner))),
        }
    }

    /// A fresh schedule for one operation.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.max_attempts, self.base_delay, self.max_delay, self.jitter)
    }

    /// Worst-case total wait between attempts, ignoring jitter.
    pub fn max_total_delay(&self) -> Duration {
        let backoff = self.backoff();
        (0..self.max_attempts.saturating_sub(1))
            .map(|retry| backoff.delay_for(retry))
            .sum()
    }

    /// Run `operation` until it succeeds, fails permanently or the attempt
    /// budget is spent. The closure receives the 1-based attempt number.
    pub fn execute<T, F>(&self, clock: &dyn Clock, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Result<T, E>,
    {
        self.run(clock, None, operation)
    }

    /// Like [`execute`](Self::execute), but never starts a wait that would
    /// end at or after `deadline`; the last error is returned as
    /// exhausted instead.
    pub fn execute_until<T, F>(
        &self,
        clock: &dyn Clock,
        deadline: SystemTime,
        operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Result<T, E>,
    {
        self.run(clock, Some(deadline), operation)
    }

    fn run<T, F>(
        &self,
        clock: &dyn Clock,
        deadline: Option<SystemTime>,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Result<T, E>,
    {
        let mut backoff = self.backoff();
        loop {
            let attempt = backoff.attempts() + 1;
            let err = match operation(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !self.should_retry(&err) {
                return Err(RetryError::Permanent(err));
            }

            let now = clock.now();
            let delay = match backoff.record_failure(now) {
                Some(delay) => delay,
                None => {
                    return Err(RetryError::RetriesExhausted {
                        attempts: attempt,
                        last: err,
                    })
                }
            };

            if let Some(deadline) = deadline {
                if now + delay >= deadline {
                    tracing::debug!(attempt, "retry deadline reached");
                    return Err(RetryError::RetriesExhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
            }

            tracing::warn!(
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "attempt failed, retrying"
            );
            clock.sleep(delay);
        }
    }
}
