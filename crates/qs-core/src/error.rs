//! Typed error definitions for the quote client.
//!
//! [`QsError`] covers every failure the client can surface. Connectivity
//! failures are absorbed by the reconnect loop and only show up in logs; the
//! per-symbol and lifecycle variants reach callers through the facade.

use thiserror::Error;

/// Result alias used throughout the library crates.
pub type Result<T> = std::result::Result<T, QsError>;

/// Domain-specific errors for the quote client.
#[derive(Debug, Error)]
pub enum QsError {
    /// Transport open, read or write failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server reported `status == "error"` for this symbol.
    #[error("invalid ticker: {0}")]
    InvalidTicker(String),

    /// An operation needing a live session ran while no engine is running.
    #[error("client is not connected")]
    NotConnected,

    /// A payload that looked like JSON could not be decoded.
    #[error("protocol decode error: {0}")]
    ProtocolDecode(String),

    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// The client was shut down while the caller was waiting.
    #[error("client shut down")]
    ClientShutDown,

    /// A newer one-shot wait for the same symbol displaced this one.
    #[error("waiter for {0} replaced by a newer request")]
    WaiterReplaced(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for QsError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        QsError::Connection(e.to_string())
    }
}
