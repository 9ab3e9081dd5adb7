//! Keepalive watchdog.
//!
//! One watchdog task runs per successful handshake. It only reads the
//! last-keepalive timestamp published by the engine; when the server has been
//! silent for longer than the ping interval it reports its generation back to
//! the engine, which tears the session down and reconnects.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

pub(crate) struct WatchdogParams {
    pub generation: u64,
    pub ping_interval: Duration,
    pub period: Duration,
    pub last_keepalive: watch::Receiver<Instant>,
    pub timeout_tx: mpsc::Sender<u64>,
}

pub(crate) fn spawn(params: WatchdogParams) -> JoinHandle<()> {
    let WatchdogParams {
        generation,
        ping_interval,
        period,
        last_keepalive,
        timeout_tx,
    } = params;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;

            let elapsed = last_keepalive.borrow().elapsed();
            if elapsed > ping_interval {
                warn!(
                    "[watchdog] last ping was {}ms ago (limit {}ms), forcing reconnect",
                    elapsed.as_millis(),
                    ping_interval.as_millis()
                );
                let _ = timeout_tx.send(generation).await;
                return;
            }
            debug!("[watchdog] last ping received {}ms ago", elapsed.as_millis());
        }
    })
}
