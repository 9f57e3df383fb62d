//! Time source used by the breaker, retry and publisher.
//!
//! Everything that waits or compares against "now" goes through a [`Clock`]
//! so tests can drive time forward without real sleeps.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

/// Source of wall-clock time and the ability to wait.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> SystemTime;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Real time, backed by `SystemTime::now` and `thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Virtual clock for deterministic tests.
///
/// `sleep` returns immediately after advancing virtual time, and every
/// requested sleep is recorded so backoff schedules can be asserted.
///
/// ```
/// use std::time::Duration;
/// use trackwise_resilience::clock::{Clock, ManualClock};
///
/// let clock = ManualClock::new();
/// let start = clock.now();
/// clock.sleep(Duration::from_millis(250));
/// assert_eq!(clock.now().duration_since(start).unwrap(), Duration::from_millis(250));
/// assert_eq!(clock.sleeps(), vec![Duration::from_millis(250)]);
/// ```
#[derive(Debug, Clone)]
pub struct ManualClock {
    start: SystemTime,
    state: Arc<Mutex<ManualState>>,
}

#[derive(Debug, Default)]
struct ManualState {
    offset: Duration,
    sleeps: Vec<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// A clock starting at a fixed point (2024-01-01T00:00:00Z).
    pub fn new() -> Self {
        Self::starting_at(SystemTime::UNIX_EPOCH + Duration::from_secs(1_704_067_200))
    }

    pub fn starting_at(start: SystemTime) -> Self {
        Self {
            start,
            state: Arc::new(Mutex::new(ManualState::default())),
        }
    }

    /// Move time forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.offset += duration;
        }
    }

    /// Total virtual time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        self.state.lock().map(|s| s.offset).unwrap_or_default()
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state
            .lock()
            .map(|s| s.sleeps.clone())
            .unwrap_or_default()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        self.start + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.offset += duration;
            state.sleeps.push(duration);
        }
    }
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Convenience for the common `Arc<SystemClock>` case.
pub fn system() -> SharedClock {
    Arc::new(SystemClock)
}
