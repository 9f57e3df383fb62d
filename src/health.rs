//! Health signals for an external monitor: breaker states, outbox backlog
//! and dead letters.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::breaker::{BreakerSnapshot, CircuitBreakerRegistry, CircuitState};
use crate::consumer::DeadLetterSink;
use crate::store::{OutboxCounts, OutboxStore, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Up,
    /// A breaker is not closed, an outbox record failed, or a dead letter
    /// is waiting.
    Degraded,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub breakers: Vec<BreakerSnapshot>,
    pub outbox: Option<OutboxCounts>,
    pub dead_letters: Option<usize>,
}

impl HealthReport {
    pub fn is_up(&self) -> bool {
        self.status == HealthStatus::Up
    }

    pub fn open_breakers(&self) -> impl Iterator<Item = &BreakerSnapshot> {
        self.breakers
            .iter()
            .filter(|b| b.state != CircuitState::Closed)
    }
}

/// Collects a [`HealthReport`] from whichever sources a service has.
///
/// The ledger service reports its breakers and outbox; the intelligence
/// service reports its dead letters.
pub struct HealthCheck {
    breakers: Arc<CircuitBreakerRegistry>,
    outbox: Option<Arc<dyn OutboxStore>>,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
}

impl HealthCheck {
    pub fn new(breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            breakers,
            outbox: None,
            dead_letters: None,
        }
    }

    pub fn with_outbox(mut self, outbox: Arc<dyn OutboxStore>) -> Self {
        self.outbox = Some(outbox);
        self
    }

    pub fn with_dead_letters(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    pub fn report(&self) -> Result<HealthReport, StoreError> {
        let breakers = self.breakers.snapshots();
        let outbox = self.outbox.as_ref().map(|o| o.counts()).transpose()?;
        let dead_letters = self.dead_letters.as_ref().map(|d| d.count()).transpose()?;

        let degraded = breakers.iter().any(|b| b.state != CircuitState::Closed)
            || outbox.map_or(false, |c| c.failed > 0)
            || dead_letters.map_or(false, |n| n > 0);

        let status = if degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Up
        };
        if degraded {
            tracing::debug!(?outbox, ?dead_letters, "health degraded");
        }

        Ok(HealthReport {
            status,
            breakers,
            outbox,
            dead_letters,
        })
    }
}
