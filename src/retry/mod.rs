//! Bounded retry with exponential backoff.
//!
//! [`Backoff`] is the explicit schedule (attempts made, next eligible time);
//! [`RetryPolicy`] drives an operation through it, waiting on an injected
//! [`Clock`](crate::clock::Clock).

mod backoff;
mod error;
mod policy;

pub use backoff::Backoff;
pub use error::{RetryError, Retryable};
pub use policy::RetryPolicy;
