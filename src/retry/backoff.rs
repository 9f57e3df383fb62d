use std::time::{Duration, SystemTime};

/// Explicit retry schedule: how many attempts have been made and when the
/// next one becomes eligible.
///
/// Nothing here sleeps. [`RetryPolicy::execute`](super::RetryPolicy::execute)
/// waits through a [`Clock`](crate::clock::Clock); callers with their own
/// scheduler can poll [`is_eligible`](Backoff::is_eligible) instead.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: f64,
    attempts: u32,
    next_eligible_at: Option<SystemTime>,
}

impl Backoff {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, jitter: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: jitter.clamp(0.0, 1.0),
            attempts: 0,
            next_eligible_at: None,
        }
    }

    /// Attempts recorded so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    pub fn next_eligible_at(&self) -> Option<SystemTime> {
        self.next_eligible_at
    }

    pub fn is_eligible(&self, now: SystemTime) -> bool {
        !self.is_exhausted() && self.next_eligible_at.map_or(true, |at| now >= at)
    }

    /// Un-jittered delay before retry number `retry` (0 = first retry):
    /// `base_delay * 2^retry`, capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        1u32.checked_shl(retry)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Record a failed attempt at `now`. Returns the delay until the next
    /// attempt, or `None` once the budget is spent.
    pub fn record_failure(&mut self, now: SystemTime) -> Option<Duration> {
        self.attempts += 1;
        if self.is_exhausted() {
            self.next_eligible_at = None;
            return None;
        }
        let delay = self.jittered(self.delay_for(self.attempts - 1));
        self.next_eligible_at = Some(now + delay);
        Some(delay)
    }

    // Down-jitter: scale by a random factor in [1 - jitter, 1].
    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter == 0.0 {
            return delay;
        }
        let factor = 1.0 - rand::random::<f64>() * self.jitter;
        Duration::from_secs_f64(delay.as_secs_f64() * factor)
    }
}
