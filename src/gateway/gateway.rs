use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::breaker::{BreakerError, CircuitBreakerRegistry};
use crate::clock::{self, SharedClock};
use crate::retry::{RetryError, RetryPolicy};

use super::error::{CallError, GatewayError, RemoteError};
use super::transport::{Request, Response, Transport};

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Replaces the dependency's retry policy for this call.
    pub retry: Option<RetryPolicy<CallError>>,
    /// Timeout of each attempt.
    pub timeout: Option<Duration>,
    /// Overall deadline. No attempt outlives it and no retry starts past it.
    pub deadline: Option<SystemTime>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry(mut self, policy: RetryPolicy<CallError>) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: SystemTime) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Guarded synchronous calls to named dependencies.
///
/// Every attempt passes through the dependency's breaker from the shared
/// registry, and attempts are driven by a retry policy: the dependency's
/// default, or the one given in [`CallOptions`].
///
/// ```ignore
/// let gateway = CallGateway::new(registry)
///     .with_dependency("intelligence", TimeoutTransport::new(client))
///     .with_retry_policy("intelligence", RetryPolicy::new().with_max_attempts(2));
///
/// let response = gateway.call("intelligence", Request::new("risk.score", json!({ "account": "acct-1" })))?;
/// ```
pub struct CallGateway {
    breakers: Arc<CircuitBreakerRegistry>,
    transports: HashMap<String, Arc<dyn Transport>>,
    retry_policies: HashMap<String, RetryPolicy<CallError>>,
    timeouts: HashMap<String, Duration>,
    default_retry: RetryPolicy<CallError>,
    default_timeout: Duration,
    clock: SharedClock,
}

impl CallGateway {
    pub fn new(breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            breakers,
            transports: HashMap::new(),
            retry_policies: HashMap::new(),
            timeouts: HashMap::new(),
            default_retry: RetryPolicy::new(),
            default_timeout: Duration::from_secs(2),
            clock: clock::system(),
        }
    }

    pub fn with_dependency<T>(mut self, name: impl Into<String>, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        self.transports.insert(name.into(), Arc::new(transport));
        self
    }

    pub fn with_retry_policy(mut self, name: impl Into<String>, policy: RetryPolicy<CallError>) -> Self {
        self.retry_policies.insert(name.into(), policy);
        self
    }

    pub fn with_timeout(mut self, name: impl Into<String>, timeout: Duration) -> Self {
        self.timeouts.insert(name.into(), timeout);
        self
    }

    pub fn with_default_retry_policy(mut self, policy: RetryPolicy<CallError>) -> Self {
        self.default_retry = policy;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn dependencies(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.transports.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    pub fn call(&self, dependency: &str, request: Request) -> Result<Response, GatewayError> {
        self.call_with(dependency, request, CallOptions::default())
    }

    pub fn call_with(
        &self,
        dependency: &str,
        request: Request,
        options: CallOptions,
    ) -> Result<Response, GatewayError> {
        let transport = self
            .transports
            .get(dependency)
            .ok_or_else(|| GatewayError::UnknownDependency(dependency.to_string()))?;
        let breaker = self.breakers.get_or_create(dependency);

        let policy = options
            .retry
            .as_ref()
            .or_else(|| self.retry_policies.get(dependency))
            .unwrap_or(&self.default_retry)
            .adapt(|err: &BreakerError<CallError>| match err {
                BreakerError::Inner(e) => Some(e),
                BreakerError::Open(_) => None,
            });
        let timeout = options
            .timeout
            .or_else(|| self.timeouts.get(dependency).copied())
            .unwrap_or(self.default_timeout);

        let attempt = |n: u32| {
            let budget = match options.deadline {
                Some(deadline) => match deadline.duration_since(self.clock.now()) {
                    Ok(left) if !left.is_zero() => timeout.min(left),
                    _ => return Err(BreakerError::Inner(CallError::Timeout(Duration::ZERO))),
                },
                None => timeout,
            };
            tracing::debug!(dependency, operation = %request.operation, attempt = n, "calling dependency");
            breaker.call_with(
                || match transport.call(&request, budget) {
                    Ok(response) if response.is_success() => Ok(response),
                    Ok(response) => Err(CallError::Remote(RemoteError::new(
                        response.status,
                        response.error_message(),
                    ))),
                    Err(err) => Err(err),
                },
                CallError::trips_breaker,
            )
        };

        let result = match options.deadline {
            Some(deadline) => policy.execute_until(self.clock.as_ref(), deadline, attempt),
            None => policy.execute(self.clock.as_ref(), attempt),
        };

        result.map_err(|err| {
            let err = match err {
                RetryError::Permanent(BreakerError::Open(open))
                | RetryError::RetriesExhausted {
                    last: BreakerError::Open(open),
                    ..
                } => GatewayError::CircuitOpen(open),
                RetryError::Permanent(BreakerError::Inner(CallError::Remote(remote))) => {
                    GatewayError::Remote(remote)
                }
                RetryError::Permanent(BreakerError::Inner(call)) => GatewayError::Call(call),
                RetryError::RetriesExhausted {
                    attempts,
                    last: BreakerError::Inner(last),
                } => GatewayError::RetriesExhausted {
                    dependency: dependency.to_string(),
                    attempts,
                    last,
                },
            };
            tracing::warn!(dependency, operation = %request.operation, error = %err, "guarded call failed");
            err
        })
    }
}
