//! Subscription registry: subscription intent, one-shot waiters and
//! persistent watchers, keyed by symbol.
//!
//! Owned by the engine task like the [`TickerStore`](crate::store::TickerStore);
//! waiters are resolved from that task only.
//!
//! At most one one-shot waiter is kept per symbol. Registering another one
//! fails the displaced waiter with [`QsError::WaiterReplaced`].

use std::collections::BTreeSet;
use std::sync::Arc;

use ahash::AHashMap;
use qs_core::{QsError, Result, TickerSnapshot};
use tokio::sync::oneshot;
use tracing::debug;

/// Reply channel of a one-shot wait.
pub type TickerReply = oneshot::Sender<Result<TickerSnapshot>>;

/// Persistent per-symbol callback: `(symbol, snapshot or invalid-ticker error)`.
///
/// Runs on the engine task, so it should return quickly.
pub type WatchCallback =
    Arc<dyn Fn(&str, std::result::Result<&TickerSnapshot, &QsError>) + Send + Sync>;

/// Box a closure as a [`WatchCallback`].
pub fn watch_callback<F>(f: F) -> WatchCallback
where
    F: Fn(&str, std::result::Result<&TickerSnapshot, &QsError>) + Send + Sync + 'static,
{
    Arc::new(f)
}

struct Waiter {
    required: Vec<String>,
    reply: TickerReply,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    /// Symbols to (re)subscribe after every handshake.
    subscriptions: BTreeSet<String>,
    waiters: AHashMap<String, Waiter>,
    watchers: AHashMap<String, WatchCallback>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record subscription intent. Returns `true` if the symbol is new.
    pub fn subscribe(&mut self, symbol: &str) -> bool {
        self.subscriptions.insert(symbol.to_string())
    }

    /// Forget subscription intent. Returns `true` if the symbol was known.
    pub fn unsubscribe(&mut self, symbol: &str) -> bool {
        self.subscriptions.remove(symbol)
    }

    pub fn is_subscribed(&self, symbol: &str) -> bool {
        self.subscriptions.contains(symbol)
    }

    /// Subscribed symbols in sorted order.
    pub fn subscriptions(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.iter().map(String::as_str)
    }

    /// Park a one-shot wait until the symbol's snapshot holds every field in
    /// `required`.
    pub fn register_waiter(&mut self, symbol: &str, required: Vec<String>, reply: TickerReply) {
        let waiter = Waiter { required, reply };
        if let Some(old) = self.waiters.insert(symbol.to_string(), waiter) {
            debug!("[registry] waiter for {symbol} replaced");
            let _ = old.reply.send(Err(QsError::WaiterReplaced(symbol.to_string())));
        }
    }

    /// Install the persistent callback for a symbol. Returns `true` if it
    /// replaced an earlier one.
    pub fn watch(&mut self, symbol: &str, callback: WatchCallback) -> bool {
        self.watchers.insert(symbol.to_string(), callback).is_some()
    }

    pub fn has_waiter(&self, symbol: &str) -> bool {
        self.waiters.contains_key(symbol)
    }

    pub fn pending_waiters(&self) -> usize {
        self.waiters.len()
    }

    /// Route an accepted update. Returns `true` if a waiter was resolved.
    pub fn on_update(&mut self, symbol: &str, snapshot: &TickerSnapshot) -> bool {
        if let Some(cb) = self.watchers.get(symbol) {
            cb(symbol, Ok(snapshot));
        }

        let Some(waiter) = self.waiters.get(symbol) else {
            return false;
        };
        let required = waiter.required.as_slice();
        if !snapshot.has_all(required) {
            debug!("[registry] {symbol} still missing {:?}", snapshot.missing(required));
            return false;
        }

        match self.waiters.remove(symbol) {
            Some(waiter) => {
                // The caller may have stopped waiting; nothing to do then.
                let _ = waiter.reply.send(Ok(snapshot.clone()));
                true
            }
            None => false,
        }
    }

    /// Route a server-side rejection of a symbol.
    pub fn on_error(&mut self, symbol: &str) {
        if let Some(cb) = self.watchers.get(symbol) {
            cb(symbol, Err(&QsError::InvalidTicker(symbol.to_string())));
        }
        if let Some(waiter) = self.waiters.remove(symbol) {
            let _ = waiter.reply.send(Err(QsError::InvalidTicker(symbol.to_string())));
        }
    }

    /// Drop everything. Pending waiters fail with [`QsError::ClientShutDown`].
    /// Returns the number of waiters failed.
    pub fn clear(&mut self) -> usize {
        let failed = self.waiters.len();
        for (_, waiter) in self.waiters.drain() {
            let _ = waiter.reply.send(Err(QsError::ClientShutDown));
        }
        self.watchers.clear();
        self.subscriptions.clear();
        failed
    }
}
