//! Request/response commands served by the intelligence service.
//!
//! Handlers are registered by name on a [`Service`] and reached either in
//! process through [`LocalTransport`] (which plugs into the call gateway)
//! or over HTTP with the `http` feature.
//!
//! ```ignore
//! let service = Arc::new(Service::new(scores).command("risk.score", handlers::risk_score));
//!
//! let gateway = CallGateway::new(registry)
//!     .with_dependency("intelligence", LocalTransport::new(service.clone()));
//! ```

mod context;
mod error;
mod local;
mod service;
mod session;

#[cfg(feature = "http")]
mod http;

pub use context::Context;
pub use error::HandlerError;
pub use local::LocalTransport;
pub use service::{CommandRequest, CommandResponse, Service};
pub use session::{Session, CALLER, CORRELATION_ID};

#[cfg(feature = "http")]
pub use http::{router, serve};
