use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::CallError;

/// A request to a remote dependency. The body schema belongs to the
/// operation being called.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub operation: String,
    pub body: Value,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Request {
    pub fn new(operation: impl Into<String>, body: Value) -> Self {
        Self {
            operation: operation.into(),
            body,
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// HTTP-style status code.
    pub status: u16,
    pub body: Value,
}

impl Response {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.body.clone())
    }

    /// Error text from a failure body shaped `{ "error": "..." }`.
    pub fn error_message(&self) -> String {
        self.body
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.body.to_string())
    }
}

/// The network seam of the gateway.
///
/// Implementations return `Ok` for every response received, whatever its
/// status, and `Err` only when no response arrived. They should give up
/// after `timeout`; wrap one that cannot in [`TimeoutTransport`].
pub trait Transport: Send + Sync {
    fn call(&self, request: &Request, timeout: Duration) -> Result<Response, CallError>;
}

impl<F> Transport for F
where
    F: Fn(&Request, Duration) -> Result<Response, CallError> + Send + Sync,
{
    fn call(&self, request: &Request, timeout: Duration) -> Result<Response, CallError> {
        self(request, timeout)
    }
}

/// Enforces the timeout for a transport that may block indefinitely.
///
/// Each call runs on its own thread. At the deadline the caller gets
/// [`CallError::Timeout`] and the thread is abandoned; its eventual result
/// is dropped.
pub struct TimeoutTransport<T> {
    inner: Arc<T>,
}

impl<T: Transport + 'static> TimeoutTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }
}

impl<T: Transport + 'static> Transport for TimeoutTransport<T> {
    fn call(&self, request: &Request, timeout: Duration) -> Result<Response, CallError> {
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let request = request.clone();

        thread::Builder::new()
            .name(format!("call-{}", request.operation))
            .spawn(move || {
                let _ = tx.send(inner.call(&request, timeout));
            })
            .map_err(|e| CallError::Transport(e.to_string()))?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(CallError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                Err(CallError::Transport("call worker exited without a result".into()))
            }
        }
    }
}
