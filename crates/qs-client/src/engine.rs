//! Connection lifecycle engine.
//!
//! A single tokio task owns the transport session, the [`SessionContext`],
//! the [`TickerStore`] and the [`SubscriptionRegistry`]. The facade talks to
//! it over a request channel, so all mutation happens on this task and no
//! locks are needed. Each cycle:
//!
//! 1. Opens a session through the [`Transport`] (`Connecting`).
//! 2. Waits for the server greeting (`HandshakeInProgress`), then sends
//!    `set_auth_token`, `quote_create_session` and `quote_set_fields`,
//!    re-subscribes every known symbol and starts the keepalive watchdog
//!    (`Ready`). A server that stays silent for a whole ping interval
//!    before greeting is dropped like a dead one.
//! 3. Reads frames, echoes keepalives and merges quote deltas until a close
//!    frame, a read/write error or a watchdog timeout (`Disconnected`).
//! 4. Sleeps `2^attempt * 1000ms` (capped) and starts over.
//!
//! Requests keep being served while connecting or backing off; subscription
//! intent recorded then is replayed at the next handshake.

use std::sync::Arc;
use std::time::Duration;

use qs_core::command;
use qs_core::config::ClientConfig;
use qs_core::framing;
use qs_core::protocol::{self, Inbound, QuoteDelta};
use qs_core::transport::{Frame, FrameSink, FrameStream, Session, Transport};
use qs_core::{ConnectionState, Result, TickerSnapshot};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::registry::{SubscriptionRegistry, TickerReply, WatchCallback};
use crate::session::SessionContext;
use crate::store::TickerStore;
use crate::watchdog::{self, WatchdogParams};

/// Facade → engine requests.
pub(crate) enum Request {
    Subscribe {
        symbol: String,
    },
    GetTicker {
        symbol: String,
        reply: oneshot::Sender<Option<TickerSnapshot>>,
    },
    AwaitTicker {
        symbol: String,
        required: Vec<String>,
        reply: TickerReply,
    },
    Watch {
        symbol: String,
        callback: WatchCallback,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// What the engine does after handling one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Reconnect,
    Stop,
}

pub(crate) struct Engine {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    session: SessionContext,
    store: TickerStore,
    registry: SubscriptionRegistry,
    requests: mpsc::Receiver<Request>,
    state_tx: watch::Sender<ConnectionState>,
    keepalive_tx: watch::Sender<Instant>,
    liveness_tx: mpsc::Sender<u64>,
    liveness_rx: mpsc::Receiver<u64>,
    /// Bumped whenever a watchdog is started or stopped; stale timeouts are ignored.
    generation: u64,
    watchdog: Option<JoinHandle<()>>,
}

impl Engine {
    pub(crate) fn new(
        config: Arc<ClientConfig>,
        transport: Arc<dyn Transport>,
        session: SessionContext,
        requests: mpsc::Receiver<Request>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        let (keepalive_tx, _) = watch::channel(session.last_keepalive);
        let (liveness_tx, liveness_rx) = mpsc::channel(4);
        Self {
            config,
            transport,
            session,
            store: TickerStore::new(),
            registry: SubscriptionRegistry::new(),
            requests,
            state_tx,
            keepalive_tx,
            liveness_tx,
            liveness_rx,
            generation: 0,
            watchdog: None,
        }
    }

    /// Run until shutdown is requested or every client handle is dropped.
    pub(crate) async fn run(mut self) {
        info!("[engine] starting quote session {}", self.session.session_id);

        loop {
            if self.connect_once().await == Flow::Stop {
                break;
            }
            let attempt = self.session.attempt;
            let delay = self.session.next_backoff(self.config.max_reconnect_delay());
            warn!("[engine] disconnected, reconnecting in {delay:?} (attempt {attempt})");
            if self.idle_for(delay).await == Flow::Stop {
                break;
            }
        }

        self.stop_watchdog();
        self.set_state(ConnectionState::Disconnected);
        info!("[engine] stopped");
    }

    /// One connect → handshake → read cycle. Returns `Reconnect` or `Stop`.
    async fn connect_once(&mut self) -> Flow {
        self.session.begin_attempt();
        self.set_state(ConnectionState::Connecting);
        info!("[engine] connecting to {}", self.config.url);

        let transport = Arc::clone(&self.transport);
        let url = self.config.url.clone();
        let headers = self.config.headers.clone();
        let open = async move { transport.open(&url, &headers).await };
        tokio::pin!(open);

        let opened = loop {
            tokio::select! {
                res = &mut open => break res,
                req = self.requests.recv() => {
                    if self.handle_offline(req) == Flow::Stop {
                        return Flow::Stop;
                    }
                }
            }
        };

        let Session { mut sink, mut stream } = match opened {
            Ok(session) => session,
            Err(e) => {
                error!("[engine] connection failed: {e}");
                self.set_state(ConnectionState::Disconnected);
                return Flow::Reconnect;
            }
        };

        self.set_state(ConnectionState::HandshakeInProgress);
        let flow = self.drive(sink.as_mut(), stream.as_mut()).await;

        self.stop_watchdog();
        self.session.ready = false;
        if sink.is_active() {
            if let Err(e) = sink.close().await {
                debug!("[engine] close failed: {e}");
            }
        }
        if flow != Flow::Stop {
            self.set_state(ConnectionState::Disconnected);
        }
        flow
    }

    /// Read loop for one open session.
    async fn drive(&mut self, sink: &mut dyn FrameSink, stream: &mut dyn FrameStream) -> Flow {
        let greeting_deadline = tokio::time::sleep(self.config.ping_interval());
        tokio::pin!(greeting_deadline);

        loop {
            let step = tokio::select! {
                frame = stream.receive() => match frame {
                    Some(Ok(Frame::Text(raw))) => self.on_text(&raw, &mut *sink).await,
                    Some(Ok(Frame::Close)) => {
                        info!("[engine] received close frame, reconnecting");
                        Ok(Flow::Reconnect)
                    }
                    Some(Ok(Frame::Other)) => {
                        debug!("[engine] ignoring non-text frame");
                        Ok(Flow::Continue)
                    }
                    Some(Err(e)) => Err(e),
                    None => {
                        warn!("[engine] stream ended");
                        Ok(Flow::Reconnect)
                    }
                },
                req = self.requests.recv() => {
                    let mut outbox = Vec::new();
                    let flow = self.handle_request(req, &mut outbox);
                    flush(&mut *sink, outbox).await.map(|()| flow)
                }
                Some(generation) = self.liveness_rx.recv() => {
                    Ok(self.on_liveness_timeout(generation))
                }
                _ = &mut greeting_deadline, if !self.session.ready => {
                    warn!(
                        "[engine] no greeting within {}ms, dropping session",
                        self.config.ping_interval_ms
                    );
                    Ok(Flow::Reconnect)
                }
            };

            match step {
                Ok(Flow::Continue) => {}
                Ok(flow) => return flow,
                Err(e) => {
                    error!("[engine] {e}");
                    return Flow::Reconnect;
                }
            }
        }
    }

    /// Serve requests until `delay` has passed.
    async fn idle_for(&mut self, delay: Duration) -> Flow {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Flow::Continue,
                req = self.requests.recv() => {
                    if self.handle_offline(req) == Flow::Stop {
                        return Flow::Stop;
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    async fn on_text(&mut self, raw: &str, sink: &mut dyn FrameSink) -> Result<Flow> {
        debug!("[engine] v {raw}");
        for payload in framing::decode(raw) {
            match protocol::classify(payload) {
                Ok(Inbound::Keepalive(ping)) => {
                    self.record_keepalive();
                    send(&mut *sink, ping).await?;
                }
                Ok(Inbound::Greeting { session_id }) => {
                    self.handshake(&session_id, &mut *sink).await?
                }
                Ok(Inbound::QuoteDelta(delta)) => self.on_quote_delta(delta),
                Ok(Inbound::Ignored) => debug!("[engine] ignoring payload {payload}"),
                Err(e) => warn!("[engine] dropping payload: {e}"),
            }
        }
        Ok(Flow::Continue)
    }

    async fn handshake(&mut self, server_session: &str, sink: &mut dyn FrameSink) -> Result<()> {
        info!("[engine] greeting received (server session {server_session}), authenticating");
        let sid = self.session.session_id.clone();

        let auth = command::set_auth_token(&self.session.auth_token);
        let create = command::quote_create_session(&sid);
        let fields = command::quote_set_fields(&sid, self.session.fields.as_slice());
        flush(&mut *sink, vec![auth, create, fields]).await?;

        self.session.mark_ready();
        self.keepalive_tx.send_replace(self.session.last_keepalive);
        self.set_state(ConnectionState::Ready);

        let replay: Vec<String> = self
            .registry
            .subscriptions()
            .map(|symbol| command::quote_add_symbols(&sid, symbol))
            .collect();
        info!("[engine] session ready, re-subscribing {} ticker(s)", replay.len());
        flush(&mut *sink, replay).await?;

        self.start_watchdog();
        Ok(())
    }

    fn on_quote_delta(&mut self, delta: QuoteDelta) {
        let QuoteDelta { status, symbol, values } = delta;
        if status == protocol::STATUS_ERROR {
            warn!("[engine] server rejected ticker {symbol}");
            self.registry.on_error(&symbol);
            // never delivered data, so it is not replayed after a reconnect
            if self.store.get(&symbol).is_none() && self.registry.unsubscribe(&symbol) {
                debug!("[engine] {symbol} removed from the subscription list");
            }
            return;
        }

        let snapshot = self.store.merge(&symbol, values);
        debug!("[engine] {symbol} now has {} field(s)", snapshot.len());
        self.registry.on_update(&symbol, snapshot);
    }

    fn on_liveness_timeout(&mut self, generation: u64) -> Flow {
        if generation != self.generation {
            debug!("[engine] ignoring stale watchdog {generation}");
            return Flow::Continue;
        }
        warn!("[engine] keepalive timeout, dropping session");
        Flow::Reconnect
    }

    fn record_keepalive(&mut self) {
        self.session.record_keepalive();
        self.keepalive_tx.send_replace(self.session.last_keepalive);
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    /// Handle a request while no session is ready. Nothing can be sent, and
    /// subscription intent is kept for the next handshake.
    fn handle_offline(&mut self, req: Option<Request>) -> Flow {
        let mut outbox = Vec::new();
        let flow = self.handle_request(req, &mut outbox);
        if !outbox.is_empty() {
            debug!("[engine] offline, deferring {} command(s)", outbox.len());
        }
        flow
    }

    /// Apply a request to the owned state; payloads to send go to `outbox`.
    fn handle_request(&mut self, req: Option<Request>, outbox: &mut Vec<String>) -> Flow {
        let Some(req) = req else {
            info!("[engine] all client handles dropped");
            self.shutdown();
            return Flow::Stop;
        };

        match req {
            Request::Subscribe { symbol } => self.subscribe(&symbol, outbox),
            Request::GetTicker { symbol, reply } => {
                let _ = reply.send(self.store.get(&symbol).cloned());
            }
            Request::AwaitTicker { symbol, required, reply } => match self.store.get(&symbol) {
                Some(snapshot) => {
                    let _ = reply.send(Ok(snapshot.clone()));
                }
                None => {
                    self.registry.register_waiter(&symbol, required, reply);
                    self.subscribe(&symbol, outbox);
                }
            },
            Request::Watch { symbol, callback } => {
                if self.registry.watch(&symbol, callback) {
                    debug!("[engine] replaced watcher for {symbol}");
                }
            }
            Request::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn subscribe(&mut self, symbol: &str, outbox: &mut Vec<String>) {
        if self.registry.subscribe(symbol) {
            info!("[engine] subscribing {symbol}");
        }
        if self.session.ready {
            outbox.push(command::quote_add_symbols(&self.session.session_id, symbol));
        }
    }

    fn shutdown(&mut self) {
        self.set_state(ConnectionState::ShuttingDown);
        self.stop_watchdog();
        let failed = self.registry.clear();
        self.store.clear();
        info!("[engine] shutting down ({failed} pending waiter(s) failed)");
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn set_state(&self, state: ConnectionState) {
        let prev = self.state_tx.send_replace(state);
        if prev != state {
            debug!("[engine] state {prev} -> {state}");
        }
    }

    fn start_watchdog(&mut self) {
        self.stop_watchdog();
        self.watchdog = Some(watchdog::spawn(WatchdogParams {
            generation: self.generation,
            ping_interval: self.config.ping_interval(),
            period: self.config.watchdog_period(),
            last_keepalive: self.keepalive_tx.subscribe(),
            timeout_tx: self.liveness_tx.clone(),
        }));
    }

    fn stop_watchdog(&mut self) {
        if let Some(task) = self.watchdog.take() {
            task.abort();
        }
        self.generation += 1;
    }
}

/// Frame and send one payload.
async fn send(sink: &mut dyn FrameSink, payload: &str) -> Result<()> {
    debug!("[engine] ^ {payload}");
    sink.send(framing::encode(payload)).await
}

async fn flush(sink: &mut dyn FrameSink, payloads: Vec<String>) -> Result<()> {
    for payload in payloads {
        send(&mut *sink, &payload).await?;
    }
    Ok(())
}
