//! Cross-module scenarios: ledger outbox to intelligence consumer, and
//! guarded synchronous lookups.

mod support;

mod breaker_gateway;
mod end_to_end;
mod outbox_flow;

#[cfg(feature = "http")]
mod http;
