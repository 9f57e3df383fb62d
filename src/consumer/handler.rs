use crate::envelope::EventEnvelope;
use crate::store::Transaction;

use super::error::ProcessingError;

/// Business logic run for each new event.
///
/// The effect must be written through `tx`: it commits together with the
/// dedup record, or not at all. Returning an error rolls both back.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &EventEnvelope, tx: &mut Transaction) -> Result<(), ProcessingError>;
}

impl<F> EventHandler for F
where
    F: Fn(&EventEnvelope, &mut Transaction) -> Result<(), ProcessingError> + Send + Sync,
{
    fn handle(&self, event: &EventEnvelope, tx: &mut Transaction) -> Result<(), ProcessingError> {
        self(event, tx)
    }
}
