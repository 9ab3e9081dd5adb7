//! Per-ticker snapshot store.
//!
//! Owned by the engine task; no locking.

use ahash::AHashMap;
use qs_core::TickerSnapshot;
use serde_json::{Map, Value};

/// Last known snapshot of every ticker the server has sent data for.
#[derive(Debug, Default)]
pub struct TickerStore {
    tickers: AHashMap<String, TickerSnapshot>,
}

impl TickerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a delta into the symbol's snapshot, creating it on first use.
    ///
    /// Delta values replace existing ones; keys absent from the delta keep
    /// their previous value.
    pub fn merge(&mut self, symbol: &str, delta: Map<String, Value>) -> &TickerSnapshot {
        let snapshot = self.tickers.entry(symbol.to_string()).or_default();
        snapshot.apply(delta);
        snapshot
    }

    pub fn get(&self, symbol: &str) -> Option<&TickerSnapshot> {
        self.tickers.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }

    pub fn clear(&mut self) {
        self.tickers.clear();
    }
}
