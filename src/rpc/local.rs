use std::sync::Arc;
use std::time::Duration;

use crate::gateway::{CallError, Request, Response, Transport};

use super::service::{CommandRequest, Service};

/// Calls a [`Service`] in process through the gateway's [`Transport`] seam.
///
/// The operation name selects the command and request headers become
/// session variables. Dispatch runs on the caller's thread; wrap in
/// [`TimeoutTransport`](crate::gateway::TimeoutTransport) to bound it.
pub struct LocalTransport<S> {
    service: Arc<Service<S>>,
}

impl<S> LocalTransport<S> {
    pub fn new(service: Arc<Service<S>>) -> Self {
        Self { service }
    }
}

impl<S> Clone for LocalTransport<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
        }
    }
}

impl<S: Send + Sync + 'static> Transport for LocalTransport<S> {
    fn call(&self, request: &Request, _timeout: Duration) -> Result<Response, CallError> {
        let response = self.service.dispatch_request(&CommandRequest {
            command: request.operation.clone(),
            input: request.body.clone(),
            session_variables: request.headers.clone(),
        });
        Ok(Response {
            status: response.status,
            body: response.body,
        })
    }
}
