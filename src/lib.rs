//! Resilience core shared by the ledger and intelligence services.
//!
//! State changes cross the service boundary as events: the ledger stages
//! them in a transactional outbox, a background publisher moves them onto
//! a partitioned log, and the intelligence service applies each one once
//! through an idempotent consumer. Lookups cross it synchronously through
//! a call gateway that wraps every attempt in a per-dependency circuit
//! breaker and a retry policy.
//!
//! ```text
//!  ledger                                      intelligence
//!  ──────                                      ────────────
//!  tx: mutation + stage_event ─▶ outbox
//!                                  │ EventPublisher
//!                                  ▼
//!                              event log ────▶ IdempotentConsumer ─▶ tx: effect + dedup
//!
//!  CallGateway ─▶ Retry ─▶ CircuitBreaker ─▶ Transport ─▶ rpc::Service
//! ```

pub mod breaker;
pub mod bus;
pub mod clock;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod gateway;
pub mod health;
pub mod outbox_worker;
pub mod retry;
pub mod rpc;
pub mod store;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitOpenError, CircuitState};
pub use bus::{InMemoryLog, Message, PublishError, Publisher, Subscriber};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ResilienceConfig};
pub use consumer::{ConsumeOutcome, DuplicateReason, EventHandler, IdempotentConsumer, ProcessingError};
pub use envelope::{DecodeError, EnvelopeCodec, EventEnvelope, EventId};
pub use gateway::{CallError, CallGateway, GatewayError, RemoteError};
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use outbox_worker::{EventPublisher, PublisherThread};
pub use retry::{RetryError, RetryPolicy, Retryable};
pub use store::{InMemoryStore, OutboxStore, StoreError, Transaction};

// Re-exported so breaker notifications can be consumed without a direct dependency.
#[cfg(feature = "emitter")]
pub use event_emitter_rs::EventEmitter;
