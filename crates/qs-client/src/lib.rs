//! # qs-client
//!
//! Streaming quote client built on [`qs_core`]:
//!
//! - [`store`] — per-ticker snapshots merged from incremental deltas
//! - [`registry`] — subscription intent, one-shot waiters, persistent watchers
//! - [`session`] — session identity, attempt counter, reconnect backoff
//! - `engine` — the single task that owns the connection and all state
//! - `watchdog` — keepalive liveness check, one per handshake
//! - [`client`] — public [`QuoteClient`] / [`QuoteHandle`] facade

pub mod client;
mod engine;
pub mod registry;
pub mod session;
pub mod store;
mod watchdog;

#[cfg(test)]
mod testing;

pub use client::{QuoteClient, QuoteHandle};
pub use registry::WatchCallback;
