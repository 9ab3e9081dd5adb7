//! Per-client session state and reconnect backoff.

use std::time::Duration;

use qs_core::command;
use tokio::time::Instant;

/// Base unit of the reconnect delay.
const BACKOFF_UNIT_MS: u64 = 1_000;

/// Reconnect delay for an attempt count: `2^attempt * 1000ms`, optionally
/// capped. Saturates instead of overflowing.
pub fn reconnect_delay(attempt: u32, cap: Option<Duration>) -> Duration {
    let delay = 2u64
        .checked_pow(attempt)
        .and_then(|p| p.checked_mul(BACKOFF_UNIT_MS))
        .map(Duration::from_millis)
        .unwrap_or(Duration::MAX);
    match cap {
        Some(cap) => delay.min(cap),
        None => delay,
    }
}

/// Session identity plus the counters the engine resets around reconnects.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// `qs_` + 12 letters, fixed for the client's lifetime.
    pub session_id: String,
    pub auth_token: String,
    pub fields: Vec<String>,
    pub ready: bool,
    pub last_keepalive: Instant,
    /// Starts at 1; grows by one per failed/dropped cycle.
    pub attempt: u32,
}

impl SessionContext {
    pub fn new(session_id: String, auth_token: String, fields: Vec<String>) -> Self {
        Self {
            session_id,
            auth_token,
            fields,
            ready: false,
            last_keepalive: Instant::now(),
            attempt: 1,
        }
    }

    pub fn generate(auth_token: String, fields: Vec<String>) -> Self {
        Self::new(command::generate_session_id(), auth_token, fields)
    }

    /// Reset readiness and the keepalive clock before a connect attempt.
    pub fn begin_attempt(&mut self) {
        self.ready = false;
        self.last_keepalive = Instant::now();
    }

    /// Handshake finished.
    pub fn mark_ready(&mut self) {
        self.ready = true;
        self.attempt = 1;
        self.last_keepalive = Instant::now();
    }

    pub fn record_keepalive(&mut self) {
        self.last_keepalive = Instant::now();
    }

    /// Delay before the next reconnect; advances the attempt counter.
    pub fn next_backoff(&mut self, cap: Option<Duration>) -> Duration {
        self.ready = false;
        let delay = reconnect_delay(self.attempt, cap);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }
}
