//! Configuration loading.
//!
//! A [`ResilienceConfig`] is read from JSON. Every field has a default, so
//! `{}` is a valid document; durations are integer milliseconds.
//!
//! ```
//! use trackwise_resilience::config::ResilienceConfig;
//!
//! let config = ResilienceConfig::from_json_str(r#"{
//!     "breaker": { "failure_threshold": 3, "cooldown_ms": 10000 },
//!     "dependencies": { "intelligence": { "failure_threshold": 2 } },
//!     "retry": { "max_attempts": 4 }
//! }"#).unwrap();
//!
//! assert_eq!(config.breaker_config("intelligence").failure_threshold, 2);
//! assert_eq!(config.breaker_config("intelligence").cooldown.as_millis(), 30_000);
//! assert_eq!(config.breaker_config("broker").failure_threshold, 3);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::clock::SharedClock;
use crate::consumer::ConsumerConfig;
use crate::envelope::EnvelopeCodec;
use crate::outbox_worker::PublisherConfig;
use crate::retry::{RetryPolicy, Retryable};

#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(e) => write!(f, "config parse error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

/// Top-level configuration for one service process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Breaker defaults for every dependency.
    #[serde(default)]
    pub breaker: BreakerSection,

    /// Per-dependency breaker settings. A dependency listed here uses only
    /// this section, with unset fields taking the built-in defaults.
    #[serde(default)]
    pub dependencies: HashMap<String, BreakerSection>,

    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub publisher: PublisherSection,

    #[serde(default)]
    pub consumer: ConsumerSection,

    #[serde(default)]
    pub codec: CodecSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSection {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_max_cooldown_ms")]
    pub max_cooldown_ms: u64,
    #[serde(default = "default_cooldown_multiplier")]
    pub cooldown_multiplier: f64,
    #[serde(default = "default_one")]
    pub half_open_max_calls: u32,
    #[serde(default = "default_one")]
    pub success_threshold: u32,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            window_ms: default_window_ms(),
            cooldown_ms: default_cooldown_ms(),
            max_cooldown_ms: default_max_cooldown_ms(),
            cooldown_multiplier: default_cooldown_multiplier(),
            half_open_max_calls: default_one(),
            success_threshold: default_one(),
        }
    }
}

impl BreakerSection {
    pub fn to_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::default()
            .with_failure_threshold(self.failure_threshold)
            .with_window(Duration::from_millis(self.window_ms))
            .with_cooldown(Duration::from_millis(self.cooldown_ms))
            .with_max_cooldown(Duration::from_millis(self.max_cooldown_ms))
            .with_cooldown_multiplier(self.cooldown_multiplier)
            .with_half_open_max_calls(self.half_open_max_calls)
            .with_success_threshold(self.success_threshold)
    }

    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return invalid(format!("{}.failure_threshold must be at least 1", section));
        }
        if self.window_ms == 0 {
            return invalid(format!("{}.window_ms must be positive", section));
        }
        if self.max_cooldown_ms < self.cooldown_ms {
            return invalid(format!("{}.max_cooldown_ms is below cooldown_ms", section));
        }
        if self.cooldown_multiplier.is_nan() || self.cooldown_multiplier < 1.0 {
            return invalid(format!("{}.cooldown_multiplier must be at least 1.0", section));
        }
        if self.half_open_max_calls == 0 || self.success_threshold == 0 {
            return invalid(format!(
                "{}.half_open_max_calls and success_threshold must be at least 1",
                section
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherSection {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_publish_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for PublisherSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_attempts: default_publish_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerSection {
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_redelivery_delay_ms")]
    pub redelivery_delay_ms: u64,
    /// Unset means transient failures are redelivered indefinitely.
    #[serde(default)]
    pub max_deliveries: Option<u32>,
}

impl Default for ConsumerSection {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            redelivery_delay_ms: default_redelivery_delay_ms(),
            max_deliveries: None,
        }
    }
}

/// Envelope schema versions the decoder accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecSection {
    #[serde(default = "default_schema_version")]
    pub min_schema_version: u32,
    #[serde(default = "default_schema_version")]
    pub max_schema_version: u32,
}

impl Default for CodecSection {
    fn default() -> Self {
        Self {
            min_schema_version: default_schema_version(),
            max_schema_version: default_schema_version(),
        }
    }
}

impl ResilienceConfig {
    /// Parse and validate.
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.breaker.validate("breaker")?;
        for (name, section) in &self.dependencies {
            section.validate(&format!("dependencies.{}", name))?;
        }

        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return invalid("retry.max_delay_ms is below base_delay_ms");
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return invalid("retry.jitter must be within [0, 1]");
        }

        if self.publisher.batch_size == 0 {
            return invalid("publisher.batch_size must be at least 1");
        }
        if self.publisher.max_attempts == 0 {
            return invalid("publisher.max_attempts must be at least 1");
        }

        if self.consumer.max_deliveries == Some(0) {
            return invalid("consumer.max_deliveries must be at least 1 when set");
        }

        if self.codec.min_schema_version > self.codec.max_schema_version {
            return invalid("codec.min_schema_version is above max_schema_version");
        }
        Ok(())
    }

    /// Breaker settings for `dependency`.
    pub fn breaker_config(&self, dependency: &str) -> CircuitBreakerConfig {
        self.dependencies
            .get(dependency)
            .unwrap_or(&self.breaker)
            .to_config()
    }

    /// A registry with the default section and every dependency override.
    pub fn breaker_registry(&self, clock: SharedClock) -> Arc<CircuitBreakerRegistry> {
        let registry = self.dependencies.iter().fold(
            CircuitBreakerRegistry::with_clock(self.breaker.to_config(), clock),
            |registry, (name, section)| registry.with_override(name.clone(), section.to_config()),
        );
        Arc::new(registry)
    }

    /// Retry policy for errors classified by [`Retryable`].
    pub fn retry_policy<E: Retryable + 'static>(&self) -> RetryPolicy<E> {
        RetryPolicy::new()
            .with_max_attempts(self.retry.max_attempts)
            .with_base_delay(Duration::from_millis(self.retry.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry.max_delay_ms))
            .with_jitter(self.retry.jitter)
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            batch_size: self.publisher.batch_size,
            max_attempts: self.publisher.max_attempts,
            poll_interval: Duration::from_millis(self.publisher.poll_interval_ms),
        }
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            poll_timeout: Duration::from_millis(self.consumer.poll_timeout_ms),
            redelivery_delay: Duration::from_millis(self.consumer.redelivery_delay_ms),
            max_deliveries: self.consumer.max_deliveries,
        }
    }

    pub fn codec(&self) -> EnvelopeCodec {
        EnvelopeCodec::new()
            .with_supported_versions(self.codec.min_schema_version..=self.codec.max_schema_version)
    }
}

fn invalid(msg: impl Into<String>) -> Result<(), ConfigError> {
    Err(ConfigError::Invalid(msg.into()))
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_cooldown_ms() -> u64 {
    30_000
}

fn default_max_cooldown_ms() -> u64 {
    300_000
}

fn default_cooldown_multiplier() -> f64 {
    2.0
}

fn default_one() -> u32 {
    1
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_jitter() -> f64 {
    0.2
}

fn default_batch_size() -> usize {
    100
}

fn default_publish_attempts() -> u32 {
    5
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_poll_timeout_ms() -> u64 {
    100
}

fn default_redelivery_delay_ms() -> u64 {
    50
}

fn default_schema_version() -> u32 {
    crate::envelope::EventEnvelope::CURRENT_SCHEMA_VERSION
}
