use std::time::Duration;

/// Thresholds and timings for one [`CircuitBreaker`](super::CircuitBreaker).
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Failures inside `window` that open a closed breaker.
    pub failure_threshold: u32,
    /// Sliding window over which closed-state failures are counted.
    pub window: Duration,
    /// How long the breaker stays open after the first trip.
    pub cooldown: Duration,
    /// Upper bound for the cooldown after consecutive re-opens.
    pub max_cooldown: Duration,
    /// Cooldown growth factor per consecutive re-open.
    pub cooldown_multiplier: f64,
    /// Trial calls admitted concurrently while half-open.
    pub half_open_max_calls: u32,
    /// Trial successes needed to close again.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(300),
            cooldown_multiplier: 2.0,
            half_open_max_calls: 1,
            success_threshold: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_max_cooldown(mut self, max: Duration) -> Self {
        self.max_cooldown = max;
        self
    }

    pub fn with_cooldown_multiplier(mut self, multiplier: f64) -> Self {
        self.cooldown_multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_half_open_max_calls(mut self, calls: u32) -> Self {
        self.half_open_max_calls = calls.max(1);
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }

    /// Cooldown to apply after `reopens` consecutive half-open failures.
    pub fn cooldown_for(&self, reopens: u32) -> Duration {
        let factor = self.cooldown_multiplier.powi(reopens.min(32) as i32);
        let secs = self.cooldown.as_secs_f64() * factor;
        let capped = secs.min(self.max_cooldown.as_secs_f64().max(self.cooldown.as_secs_f64()));
        Duration::from_secs_f64(capped)
    }
}
