//! Public client facade.
//!
//! [`QuoteClient`] owns the engine task's lifecycle (`connect` / `shutdown`).
//! [`QuoteHandle`] is the cheap, cloneable half used to query tickers from
//! any task; both forward to the engine over its request channel.

use std::sync::Arc;

use qs_core::config::ClientConfig;
use qs_core::transport::{Transport, WsTransport};
use qs_core::{ConnectionState, QsError, Result, TickerSnapshot};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::engine::{Engine, Request};
use crate::registry::{self, WatchCallback};
use crate::session::SessionContext;

/// Request/response access to a running engine.
#[derive(Clone)]
pub struct QuoteHandle {
    requests: mpsc::Sender<Request>,
    state: watch::Receiver<ConnectionState>,
    default_fields: Arc<[String]>,
}

impl QuoteHandle {
    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Suspend until the session is ready.
    ///
    /// Fails with [`QsError::NotConnected`] if the engine stops first.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut state = self.state.clone();
        match state.wait_for(|s| s.is_ready()).await {
            Ok(_) => Ok(()),
            Err(_) => Err(QsError::NotConnected),
        }
    }

    /// Record interest in a symbol. Sent right away when the session is
    /// ready, otherwise replayed at the next handshake.
    pub async fn subscribe(&self, symbol: &str) -> Result<()> {
        let symbol = symbol.to_string();
        self.request(Request::Subscribe { symbol }).await
    }

    /// Current snapshot of a symbol, without waiting.
    pub async fn get_ticker(&self, symbol: &str) -> Result<Option<TickerSnapshot>> {
        let symbol = symbol.to_string();
        let (reply, rx) = oneshot::channel();
        self.request(Request::GetTicker { symbol, reply }).await?;
        rx.await.map_err(|_| QsError::NotConnected)
    }

    /// Known snapshot of `symbol`, or wait until it carries every default
    /// field.
    pub async fn get_or_await_ticker(&self, symbol: &str) -> Result<TickerSnapshot> {
        let required = self.default_fields.to_vec();
        self.await_ticker(symbol, required).await
    }

    /// Known snapshot of `symbol`, or subscribe and wait until it carries
    /// every field in `required`.
    ///
    /// Fails with [`QsError::InvalidTicker`] if the server rejects the
    /// symbol, [`QsError::WaiterReplaced`] if another wait for the same
    /// symbol starts before this one resolves, and
    /// [`QsError::ClientShutDown`] if the client shuts down meanwhile.
    pub async fn get_or_await_ticker_with<S: AsRef<str>>(
        &self,
        symbol: &str,
        required: &[S],
    ) -> Result<TickerSnapshot> {
        let required = required.iter().map(|f| f.as_ref().to_string()).collect();
        self.await_ticker(symbol, required).await
    }

    /// Install a persistent callback for every accepted update of `symbol`,
    /// replacing any earlier one. Server rejections arrive as
    /// `Err(QsError::InvalidTicker)`.
    ///
    /// The callback runs on the engine task. It does not subscribe the
    /// symbol; pair it with [`subscribe`](Self::subscribe).
    pub async fn watch<F>(&self, symbol: &str, callback: F) -> Result<()>
    where
        F: Fn(&str, std::result::Result<&TickerSnapshot, &QsError>) + Send + Sync + 'static,
    {
        let symbol = symbol.to_string();
        let callback: WatchCallback = registry::watch_callback(callback);
        self.request(Request::Watch { symbol, callback }).await
    }

    async fn await_ticker(&self, symbol: &str, required: Vec<String>) -> Result<TickerSnapshot> {
        self.wait_ready().await?;
        let symbol = symbol.to_string();
        let (reply, rx) = oneshot::channel();
        self.request(Request::AwaitTicker {
            symbol,
            required,
            reply,
        })
        .await?;
        rx.await.unwrap_or(Err(QsError::ClientShutDown))
    }

    async fn request(&self, req: Request) -> Result<()> {
        self.requests
            .send(req)
            .await
            .map_err(|_| QsError::NotConnected)
    }
}

struct Running {
    handle: QuoteHandle,
    task: JoinHandle<()>,
}

/// Streaming quote client.
///
/// ```no_run
/// # async fn demo() -> qs_core::Result<()> {
/// use qs_client::QuoteClient;
/// use qs_core::config::ClientConfig;
///
/// let mut client = QuoteClient::new(ClientConfig::default())?;
/// client.connect().await?;
/// let aapl = client.get_or_await_ticker_with("NASDAQ:AAPL", &["lp"]).await?;
/// println!("last price: {:?}", aapl.get("lp"));
/// client.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct QuoteClient {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    session_id: String,
    running: Option<Running>,
}

impl QuoteClient {
    /// Client over the WebSocket transport.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_transport(config, Arc::new(WsTransport::new()))
    }

    /// Client over any [`Transport`].
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let session = SessionContext::generate(config.auth_token.clone(), config.fields.clone());
        Ok(Self {
            config: Arc::new(config),
            transport,
            session_id: session.session_id,
            running: None,
        })
    }

    /// Quote session id (`qs_` + 12 letters), stable across reconnects.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.running
            .as_ref()
            .map(|r| r.handle.state())
            .unwrap_or_default()
    }

    /// Start the engine (if it is not running) and wait until the session is
    /// ready. Reconnection after a drop is automatic; call this once.
    pub async fn connect(&mut self) -> Result<()> {
        if self.running.as_ref().is_some_and(|r| r.task.is_finished()) {
            self.running = None;
        }

        if self.running.is_none() {
            self.running = Some(self.spawn_engine());
        }

        self.handle()?.wait_ready().await?;
        info!("[client] {} connected", self.session_id);
        Ok(())
    }

    fn spawn_engine(&self) -> Running {
        let (requests_tx, requests_rx) = mpsc::channel(self.config.request_buffer);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let session = SessionContext::new(
            self.session_id.clone(),
            self.config.auth_token.clone(),
            self.config.fields.clone(),
        );
        let engine = Engine::new(
            Arc::clone(&self.config),
            Arc::clone(&self.transport),
            session,
            requests_rx,
            state_tx,
        );
        let task = tokio::spawn(engine.run());

        let handle = QuoteHandle {
            requests: requests_tx,
            state: state_rx,
            default_fields: self.config.fields.clone().into(),
        };
        Running { handle, task }
    }

    /// Handle for querying from other tasks.
    pub fn handle(&self) -> Result<QuoteHandle> {
        self.running().cloned()
    }

    pub async fn subscribe(&self, symbol: &str) -> Result<()> {
        self.running()?.subscribe(symbol).await
    }

    pub async fn get_ticker(&self, symbol: &str) -> Result<Option<TickerSnapshot>> {
        self.running()?.get_ticker(symbol).await
    }

    /// See [`QuoteHandle::get_or_await_ticker`].
    pub async fn get_or_await_ticker(&self, symbol: &str) -> Result<TickerSnapshot> {
        self.running()?.get_or_await_ticker(symbol).await
    }

    /// See [`QuoteHandle::get_or_await_ticker_with`].
    pub async fn get_or_await_ticker_with<S: AsRef<str>>(
        &self,
        symbol: &str,
        required: &[S],
    ) -> Result<TickerSnapshot> {
        self.running()?
            .get_or_await_ticker_with(symbol, required)
            .await
    }

    /// See [`QuoteHandle::watch`].
    pub async fn watch<F>(&self, symbol: &str, callback: F) -> Result<()>
    where
        F: Fn(&str, std::result::Result<&TickerSnapshot, &QsError>) + Send + Sync + 'static,
    {
        self.running()?.watch(symbol, callback).await
    }

    /// Close the transport, fail pending waits with
    /// [`QsError::ClientShutDown`], drop every snapshot, watcher and
    /// subscription, and stop reconnecting. No-op if not running.
    pub async fn shutdown(&mut self) -> Result<()> {
        let Some(Running { handle, task }) = self.running.take() else {
            return Ok(());
        };

        let (reply, rx) = oneshot::channel();
        if handle.request(Request::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
        if let Err(e) = task.await {
            warn!("[client] engine task ended abnormally: {e}");
        }
        info!("[client] {} shut down", self.session_id);
        Ok(())
    }

    fn running(&self) -> Result<&QuoteHandle> {
        self.running
            .as_ref()
            .map(|r| &r.handle)
            .ok_or(QsError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use qs_core::framing;
    use qs_core::transport::Frame;
    use serde_json::json;
    use tokio::time::Instant;

    use super::*;
    use crate::testing::{MockServer, MockTransport, ServerConn, added_symbol};

    fn test_config() -> ClientConfig {
        ClientConfig {
            fields: vec!["lp".into(), "ch".into()],
            ..Default::default()
        }
    }

    fn test_client() -> (QuoteClient, MockServer) {
        let (transport, server) = MockTransport::new();
        let client = QuoteClient::with_transport(test_config(), transport).unwrap();
        (client, server)
    }

    async fn connected() -> (QuoteClient, MockServer, ServerConn) {
        let (mut client, mut server) = test_client();
        let (res, mut conn) = tokio::join!(client.connect(), async {
            let conn = server.accept().await;
            conn.greet();
            conn
        });
        res.unwrap();
        conn.expect_handshake(client.session_id()).await;
        (client, server, conn)
    }

    async fn accept_ready(server: &mut MockServer, session_id: &str) -> ServerConn {
        let mut conn = server.accept().await;
        conn.greet();
        conn.expect_handshake(session_id).await;
        conn
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let (transport, _server) = MockTransport::new();
        let cfg = ClientConfig {
            fields: vec![],
            ..Default::default()
        };
        let res = QuoteClient::with_transport(cfg, transport);
        assert!(matches!(res, Err(QsError::Config(_))));
    }

    #[tokio::test]
    async fn calls_before_connect_fail_with_not_connected() {
        let (client, _server) = test_client();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(matches!(client.get_ticker("A").await, Err(QsError::NotConnected)));
        assert!(matches!(client.subscribe("A").await, Err(QsError::NotConnected)));
        assert!(client.handle().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_authenticates_and_reaches_ready() {
        let (client, server, _conn) = connected().await;
        assert_eq!(client.state(), ConnectionState::Ready);
        assert_eq!(server.open_attempts(), 1);

        let sid = client.session_id();
        assert!(sid.starts_with("qs_"));
        assert_eq!(sid.len(), 15);
        assert!(sid[3..].chars().all(|c| c.is_ascii_lowercase()));
    }

    #[tokio::test(start_paused = true)]
    async fn server_that_never_greets_is_dropped() {
        let (mut client, mut server) = test_client();
        let sid = client.session_id().to_string();
        let started = Instant::now();

        let (res, ()) = tokio::join!(client.connect(), async {
            let mut silent = server.accept().await;
            silent.closed().await;
            // a full ping interval without a greeting
            assert_eq!(started.elapsed(), Duration::from_secs(20));

            let _conn = accept_ready(&mut server, &sid).await;
            assert_eq!(started.elapsed(), Duration::from_secs(22));
        });

        res.unwrap();
        assert_eq!(client.state(), ConnectionState::Ready);
        assert_eq!(server.open_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_is_echoed_verbatim() {
        let (_client, _server, mut conn) = connected().await;
        conn.ping(7);
        assert_eq!(conn.next_payload().await, "~h~7");
        conn.ping(8);
        assert_eq!(conn.next_payload().await, "~h~8");
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_resolves_once_required_fields_arrive() {
        let (client, _server, mut conn) = connected().await;

        let wait = client.get_or_await_ticker_with("NASDAQ:AAPL", &["lp", "ch"]);
        let (snap, ()) = tokio::join!(wait, async {
            let cmd = conn.next_command().await;
            assert_eq!(cmd["p"][0], client.session_id());
            assert_eq!(added_symbol(&cmd), Some("NASDAQ:AAPL"));
            assert_eq!(cmd["p"][2], json!({"flags": ["force_permission"]}));
            conn.quote("NASDAQ:AAPL", json!({"lp": 187.5}));
            conn.quote("NASDAQ:AAPL", json!({"ch": -1.25}));
        });

        let snap = snap.unwrap();
        assert_eq!(snap.get("lp"), Some(&json!(187.5)));
        assert_eq!(snap.get("ch"), Some(&json!(-1.25)));
    }

    #[tokio::test(start_paused = true)]
    async fn known_snapshot_is_returned_without_waiting() {
        let (client, _server, mut conn) = connected().await;

        let (first, ()) = tokio::join!(client.get_or_await_ticker("A"), async {
            conn.next_command().await;
            conn.quote("A", json!({"lp": 1, "ch": 2}));
        });
        first.unwrap();

        // Already known: returned as-is even though "volume" never arrived.
        let again = client.get_or_await_ticker_with("A", &["volume"]).await;
        let again = again.unwrap();
        assert_eq!(again.get("lp"), Some(&json!(1)));
        assert!(conn.try_next_raw().is_none());
        assert_eq!(client.get_ticker("A").await.unwrap(), Some(again));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_symbol_fails_waiter_and_stores_nothing() {
        let (client, _server, mut conn) = connected().await;

        let (res, ()) = tokio::join!(client.get_or_await_ticker("BAD:X"), async {
            conn.next_command().await;
            conn.reject("BAD:X");
        });

        match res {
            Err(QsError::InvalidTicker(s)) => assert_eq!(s, "BAD:X"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(client.get_ticker("BAD:X").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_symbol_is_not_resubscribed_after_reconnect() {
        let (client, mut server, mut conn) = connected().await;
        let sid = client.session_id().to_string();

        let (res, ()) = tokio::join!(client.get_or_await_ticker("BAD:X"), async {
            conn.next_command().await;
            conn.reject("BAD:X");
        });
        assert!(matches!(res, Err(QsError::InvalidTicker(_))));

        drop(conn);
        let mut conn = accept_ready(&mut server, &sid).await;

        // nothing replayed, so the first command after the handshake is this one
        client.subscribe("GOOD:Y").await.unwrap();
        let cmd = conn.next_command().await;
        assert_eq!(added_symbol(&cmd), Some("GOOD:Y"));
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_keeps_an_existing_snapshot() {
        let (client, mut server, mut conn) = connected().await;
        let sid = client.session_id().to_string();
        let (tx, mut rx) = mpsc::unbounded_channel();

        client
            .watch("A", move |_, res| {
                let _ = tx.send(res.is_ok());
            })
            .await
            .unwrap();
        let (snap, ()) = tokio::join!(client.get_or_await_ticker("A"), async {
            conn.next_command().await;
            conn.quote("A", json!({"lp": 1, "ch": 2}));
        });
        let snap = snap.unwrap();
        assert_eq!(rx.recv().await, Some(true));

        conn.reject("A");
        assert_eq!(rx.recv().await, Some(false));
        assert_eq!(client.get_ticker("A").await.unwrap(), Some(snap));

        // it has delivered data before, so it stays subscribed
        drop(conn);
        let mut conn = accept_ready(&mut server, &sid).await;
        assert_eq!(added_symbol(&conn.next_command().await), Some("A"));
    }

    #[tokio::test(start_paused = true)]
    async fn second_waiter_displaces_the_first() {
        let (client, _server, mut conn) = connected().await;
        let handle = client.handle().unwrap();

        let first = tokio::spawn(async move { handle.get_or_await_ticker("A").await });
        assert_eq!(added_symbol(&conn.next_command().await), Some("A"));

        let (second, ()) = tokio::join!(client.get_or_await_ticker("A"), async {
            // re-sent because the session is ready
            assert_eq!(added_symbol(&conn.next_command().await), Some("A"));
            conn.quote("A", json!({"lp": 1, "ch": 1}));
        });

        assert!(second.is_ok());
        let first = first.await.unwrap();
        assert!(matches!(first, Err(QsError::WaiterReplaced(s)) if s == "A"));
    }

    #[tokio::test(start_paused = true)]
    async fn watcher_sees_every_update_and_rejection() {
        let (client, _server, mut conn) = connected().await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        client
            .watch("A", move |symbol, res| {
                let seen = res
                    .map(|s| s.get("lp").cloned())
                    .map_err(|e| e.to_string());
                let _ = tx.send((symbol.to_string(), seen));
            })
            .await
            .unwrap();
        client.subscribe("A").await.unwrap();
        assert_eq!(added_symbol(&conn.next_command().await), Some("A"));

        conn.quote("A", json!({"lp": 1}));
        conn.quote("A", json!({"ch": 5}));
        conn.reject("A");

        let a = "A".to_string();
        assert_eq!(rx.recv().await.unwrap(), (a.clone(), Ok(Some(json!(1)))));
        assert_eq!(rx.recv().await.unwrap(), (a.clone(), Ok(Some(json!(1)))));
        let rejected = Err("invalid ticker: A".to_string());
        assert_eq!(rx.recv().await.unwrap(), (a, rejected));
    }

    #[tokio::test(start_paused = true)]
    async fn several_envelopes_in_one_frame_are_all_handled() {
        let (client, _server, mut conn) = connected().await;

        let (snap, ()) = tokio::join!(client.get_or_await_ticker("A"), async {
            conn.next_command().await;
            let body = json!({"n": "A", "s": "ok", "v": {"lp": 3, "ch": 0}});
            let delta = json!({"m": "qsd", "p": ["x", body]}).to_string();
            let raw = format!("{}{}", framing::encode("~h~3"), framing::encode(&delta));
            conn.push(Frame::Text(raw));
            assert_eq!(conn.next_payload().await, "~h~3");
        });
        assert_eq!(snap.unwrap().get("lp"), Some(&json!(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_payload_does_not_drop_the_session() {
        let (client, server, mut conn) = connected().await;

        let (snap, ()) = tokio::join!(client.get_or_await_ticker("A"), async {
            conn.next_command().await;
            conn.send_payload("{not json}");
            conn.send_payload(r#"{"m":"qsd","p":["x"]}"#);
            conn.quote("A", json!({"lp": 1, "ch": 1}));
        });
        snap.unwrap();
        assert_eq!(server.open_attempts(), 1);
        assert_eq!(client.state(), ConnectionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn subscriptions_are_replayed_after_reconnect() {
        let (client, mut server, mut conn) = connected().await;
        let sid = client.session_id().to_string();

        client.subscribe("B").await.unwrap();
        client.subscribe("A").await.unwrap();
        assert_eq!(added_symbol(&conn.next_command().await), Some("B"));
        assert_eq!(added_symbol(&conn.next_command().await), Some("A"));

        drop(conn);
        let dropped_at = Instant::now();
        let mut conn = accept_ready(&mut server, &sid).await;
        assert_eq!(dropped_at.elapsed(), Duration::from_secs(2));

        assert_eq!(added_symbol(&conn.next_command().await), Some("A"));
        assert_eq!(added_symbol(&conn.next_command().await), Some("B"));
        client.handle().unwrap().wait_ready().await.unwrap();
        assert_eq!(server.open_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_while_reconnecting_is_deferred() {
        let (client, mut server, conn) = connected().await;
        let sid = client.session_id().to_string();

        drop(conn);
        client.subscribe("C").await.unwrap();

        let mut conn = accept_ready(&mut server, &sid).await;
        assert_eq!(added_symbol(&conn.next_command().await), Some("C"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_opens_back_off_exponentially_then_reset() {
        let (client, mut server, conn) = connected().await;
        let sid = client.session_id().to_string();

        server.fail_next_opens(2);
        drop(conn);
        let dropped_at = Instant::now();
        let conn = accept_ready(&mut server, &sid).await;
        // 2s after the drop, then 4s and 8s after each refused open
        assert_eq!(dropped_at.elapsed(), Duration::from_secs(14));
        assert_eq!(server.open_attempts(), 4);

        drop(conn);
        let dropped_at = Instant::now();
        let _conn = accept_ready(&mut server, &sid).await;
        assert_eq!(dropped_at.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn close_frame_triggers_reconnect() {
        let (client, mut server, mut conn) = connected().await;
        let sid = client.session_id().to_string();

        conn.push(Frame::Close);
        conn.closed().await;
        let _conn = accept_ready(&mut server, &sid).await;
        assert_eq!(server.open_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_is_dropped_by_the_watchdog() {
        let (client, mut server, mut conn) = connected().await;
        let sid = client.session_id().to_string();
        let ready_at = Instant::now();

        conn.closed().await;
        // last check at 25s finds 25s > 20s of silence
        assert_eq!(ready_at.elapsed(), Duration::from_secs(25));
        let _conn = accept_ready(&mut server, &sid).await;
        assert_eq!(ready_at.elapsed(), Duration::from_secs(27));
    }

    #[tokio::test(start_paused = true)]
    async fn regular_keepalives_keep_the_session() {
        let (_client, server, mut conn) = connected().await;

        for n in 1..=6 {
            tokio::time::sleep(Duration::from_secs(10)).await;
            conn.ping(n);
            assert_eq!(conn.next_payload().await, format!("~h~{n}"));
        }
        assert_eq!(server.open_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_fails_pending_waits_and_closes_the_session() {
        let (mut client, _server, mut conn) = connected().await;
        let handle = client.handle().unwrap();

        let (res, ()) = tokio::join!(handle.get_or_await_ticker("A"), async {
            conn.next_command().await;
            client.shutdown().await.unwrap();
        });

        assert!(matches!(res, Err(QsError::ClientShutDown)));
        conn.closed().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(matches!(client.get_ticker("A").await, Err(QsError::NotConnected)));
        assert!(matches!(handle.get_ticker("A").await, Err(QsError::NotConnected)));
        let res = handle.get_or_await_ticker("A").await;
        assert!(matches!(res, Err(QsError::NotConnected)));

        // second shutdown is a no-op
        client.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_after_shutdown_starts_from_scratch() {
        let (mut client, mut server, mut conn) = connected().await;
        let sid = client.session_id().to_string();

        let (snap, ()) = tokio::join!(client.get_or_await_ticker("A"), async {
            conn.next_command().await;
            conn.quote("A", json!({"lp": 1, "ch": 1}));
        });
        snap.unwrap();
        client.shutdown().await.unwrap();

        let accept = accept_ready(&mut server, &sid);
        let (res, mut conn) = tokio::join!(client.connect(), accept);
        res.unwrap();
        assert_eq!(client.session_id(), sid);
        assert_eq!(client.get_ticker("A").await.unwrap(), None);

        // "A" is not replayed; the first command after the handshake is the new one
        client.subscribe("Z").await.unwrap();
        assert_eq!(added_symbol(&conn.next_command().await), Some("Z"));
    }
}
