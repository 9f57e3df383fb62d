use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::HandlerError;
use super::session::Session;

/// Everything a command handler sees: the input, the caller's session
/// and the service state.
pub struct Context<'a, S> {
    command_name: String,
    input: Value,
    session: Session,
    state: &'a S,
}

impl<'a, S> Context<'a, S> {
    pub(crate) fn new(command_name: String, input: Value, session: Session, state: &'a S) -> Self {
        Self {
            command_name,
            input,
            session,
            state,
        }
    }

    /// Deserialize the input into the handler's request type.
    pub fn input<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        serde_json::from_value(self.input.clone())
            .map_err(|e| HandlerError::DecodeFailed(e.to_string()))
    }

    pub fn raw_input(&self) -> &Value {
        &self.input
    }

    pub fn command_name(&self) -> &str {
        &self.command_name
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.session.correlation_id()
    }

    pub fn state(&self) -> &S {
        self.state
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.input.get(field).is_some()
    }

    pub fn has_fields(&self, fields: &[&str]) -> bool {
        fields.iter().all(|f| self.has_field(f))
    }
}
