//! Shared value types: ticker snapshots and the connection state.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Last known merged field values of one ticker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TickerSnapshot(Map<String, Value>);

impl TickerSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of one field, if known.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Required fields not present in this snapshot, in the order given.
    pub fn missing<'a, S: AsRef<str>>(&self, required: &'a [S]) -> Vec<&'a str> {
        required
            .iter()
            .map(AsRef::as_ref)
            .filter(|f| !self.contains(f))
            .collect()
    }

    /// Returns `true` if every required field is present.
    pub fn has_all<S: AsRef<str>>(&self, required: &[S]) -> bool {
        required.iter().all(|f| self.contains(f.as_ref()))
    }

    /// Apply a delta: delta values win, untouched keys survive.
    pub fn apply(&mut self, delta: Map<String, Value>) {
        self.0.extend(delta);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for TickerSnapshot {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Lifecycle state of the connection, published by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    HandshakeInProgress,
    Ready,
    ShuttingDown,
}

impl ConnectionState {
    pub fn is_ready(self) -> bool {
        self == ConnectionState::Ready
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::HandshakeInProgress => "handshake",
            ConnectionState::Ready => "ready",
            ConnectionState::ShuttingDown => "shutting-down",
        };
        f.write_str(s)
    }
}
