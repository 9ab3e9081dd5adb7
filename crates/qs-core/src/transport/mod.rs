//! Framed text-message transport contract.
//!
//! The engine only needs to open a session, send text frames and read
//! frames until the session ends. [`Transport`] captures that; [`ws`] is the
//! WebSocket implementation used in production, tests plug in in-memory ones.

pub mod ws;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

pub use ws::WsTransport;

/// One inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close,
    /// Binary, ping, pong or raw frames. The quote protocol never uses them.
    Other,
}

/// Write half of a session.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame, returning once it has been flushed.
    async fn send(&mut self, text: String) -> Result<()>;
    /// Close the session.
    async fn close(&mut self) -> Result<()>;
    /// `false` once the session has been closed from this side or a write
    /// has failed.
    fn is_active(&self) -> bool;
}

/// Read half of a session.
#[async_trait]
pub trait FrameStream: Send {
    /// Next inbound frame, or `None` once the session has ended.
    ///
    /// Must be cancel-safe: the engine polls it inside `tokio::select!`.
    async fn receive(&mut self) -> Option<Result<Frame>>;
}

/// An open session, split so reads and writes can be multiplexed by one task.
pub struct Session {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

/// Opens sessions to the quote service.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a session. Fails with [`QsError::Connection`](crate::QsError::Connection).
    async fn open(&self, url: &str, headers: &HashMap<String, String>) -> Result<Session>;
}
