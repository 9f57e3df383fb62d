//! Synchronous call gateway: retry around a per-dependency breaker around
//! the network call.
//!
//! ```text
//!  call(dep, req) ─▶ RetryPolicy ─▶ CircuitBreaker(dep) ─▶ Transport ─▶ dependency
//! ```

mod error;
mod gateway;
mod transport;

pub use error::{CallError, GatewayError, RemoteError};
pub use gateway::{CallGateway, CallOptions};
pub use transport::{Request, Response, TimeoutTransport, Transport};
