//! Caller-supplied request variables (headers on HTTP, `Request::headers`
//! in process).

use std::collections::HashMap;

pub const CALLER: &str = "x-caller-service";
pub const CORRELATION_ID: &str = "x-correlation-id";

/// Variables forwarded with a command, such as the calling service and
/// the correlation id of the operation that triggered it.
#[derive(Debug, Clone, Default)]
pub struct Session {
    variables: HashMap<String, String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(variables: HashMap<String, String>) -> Self {
        Self { variables }
    }

    /// Name of the calling service (`x-caller-service`).
    pub fn caller(&self) -> Option<&str> {
        self.get(CALLER)
    }

    /// `x-correlation-id`
    pub fn correlation_id(&self) -> Option<&str> {
        self.get(CORRELATION_ID)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.variables.get(key).map(|v| v.as_str())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(key.into(), value.into());
    }

    pub fn has(&self, key: &str) -> bool {
        self.variables.contains_key(key)
    }

    pub fn variables(&self) -> &HashMap<String, String> {
        &self.variables
    }
}
