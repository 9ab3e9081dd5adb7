//! # qs-core
//!
//! Protocol building blocks for the streaming quote client:
//!
//! - **Framing** (`framing`) — `~m~<len>~m~<payload>` envelope codec
//! - **Commands** (`command`) — outbound `{"m": .., "p": [..]}` payloads
//! - **Protocol** (`protocol`) — classification of inbound payloads
//! - **Types** (`types`) — ticker snapshots and connection state
//! - **Configuration** (`config`) — JSON client config with defaults
//! - **Error types** (`error`) — domain-specific `QsError` via thiserror
//! - **Transport** (`transport`) — framed text-message contract + WebSocket impl
//! - **Logging** (`logging`) — tracing-based structured logging

pub mod command;
pub mod config;
pub mod error;
pub mod framing;
pub mod logging;
pub mod protocol;
pub mod transport;
pub mod types;

pub use error::{QsError, Result};
pub use types::*;
