//! In-memory transport for driving the engine in tests.
//!
//! Every `open()` hands the test a [`ServerConn`]: frames pushed into it reach
//! the engine's read loop, and everything the engine sends can be read back.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use qs_core::framing;
use qs_core::transport::{Frame, FrameSink, FrameStream, Session, Transport};
use qs_core::{QsError, Result};
use serde_json::{Value, json};
use tokio::sync::mpsc;

pub(crate) struct MockTransport {
    accepted: mpsc::UnboundedSender<ServerConn>,
    fail_next: AtomicUsize,
    opened: AtomicUsize,
}

/// Test-side view of the transport.
pub(crate) struct MockServer {
    transport: Arc<MockTransport>,
    accepted: mpsc::UnboundedReceiver<ServerConn>,
}

impl MockTransport {
    pub(crate) fn new() -> (Arc<Self>, MockServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            accepted: tx,
            fail_next: AtomicUsize::new(0),
            opened: AtomicUsize::new(0),
        });
        let server = MockServer {
            transport: Arc::clone(&transport),
            accepted: rx,
        };
        (transport, server)
    }
}

impl MockServer {
    /// Next session the engine opens.
    pub(crate) async fn accept(&mut self) -> ServerConn {
        self.accepted.recv().await.expect("transport dropped")
    }

    /// Make the next `n` opens fail.
    pub(crate) fn fail_next_opens(&self, n: usize) {
        self.transport.fail_next.store(n, Ordering::SeqCst);
    }

    /// Number of open attempts, failed ones included.
    pub(crate) fn open_attempts(&self) -> usize {
        self.transport.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, _url: &str, _headers: &HashMap<String, String>) -> Result<Session> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(QsError::Connection("refused".into()));
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let conn = ServerConn {
            to_client,
            from_client,
        };
        self.accepted
            .send(conn)
            .map_err(|_| QsError::Connection("server gone".into()))?;

        Ok(Session {
            sink: Box::new(MockSink {
                outbound: Some(outbound),
            }),
            stream: Box::new(MockStream { inbound }),
        })
    }
}

struct MockSink {
    outbound: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send(&mut self, text: String) -> Result<()> {
        let tx = self
            .outbound
            .as_ref()
            .ok_or_else(|| QsError::Connection("closed".into()))?;
        tx.send(text)
            .map_err(|_| QsError::Connection("peer gone".into()))
    }

    async fn close(&mut self) -> Result<()> {
        self.outbound = None;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.outbound.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

struct MockStream {
    inbound: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl FrameStream for MockStream {
    async fn receive(&mut self) -> Option<Result<Frame>> {
        self.inbound.recv().await.map(Ok)
    }
}

/// Server end of one session. Dropping it ends the engine's read loop.
pub(crate) struct ServerConn {
    to_client: mpsc::UnboundedSender<Frame>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl ServerConn {
    pub(crate) fn push(&self, frame: Frame) {
        let _ = self.to_client.send(frame);
    }

    /// Send one enveloped payload.
    pub(crate) fn send_payload(&self, payload: &str) {
        self.push(Frame::Text(framing::encode(payload)));
    }

    pub(crate) fn greet(&self) {
        let greeting = r#"{"session_id":"<0.1.2>_server","timestamp":1,"release":"test"}"#;
        self.send_payload(greeting);
    }

    pub(crate) fn ping(&self, n: u32) {
        self.send_payload(&format!("~h~{n}"));
    }

    pub(crate) fn quote(&self, symbol: &str, values: Value) {
        self.send_delta(json!({"n": symbol, "s": "ok", "v": values}));
    }

    pub(crate) fn reject(&self, symbol: &str) {
        self.send_delta(json!({"n": symbol, "s": "error", "v": {}}));
    }

    fn send_delta(&self, body: Value) {
        let msg = json!({"m": "qsd", "p": ["qs_ignored", body]});
        self.send_payload(&msg.to_string());
    }

    /// Next payload the client sent, unwrapped from its envelope.
    pub(crate) async fn next_payload(&mut self) -> String {
        let raw = self
            .from_client
            .recv()
            .await
            .expect("client closed the session");
        let payloads = framing::decode(&raw);
        assert_eq!(payloads.len(), 1, "expected one envelope in {raw}");
        payloads[0].to_string()
    }

    /// Next payload, parsed.
    pub(crate) async fn next_command(&mut self) -> Value {
        let payload = self.next_payload().await;
        serde_json::from_str(&payload).expect("client sent invalid json")
    }

    /// Consume the three handshake commands, checking their methods.
    pub(crate) async fn expect_handshake(&mut self, session_id: &str) {
        let auth = self.next_command().await;
        assert_eq!(auth["m"], "set_auth_token");
        let create = self.next_command().await;
        assert_eq!(create, json!({"m": "quote_create_session", "p": [session_id]}));
        let fields = self.next_command().await;
        assert_eq!(fields["m"], "quote_set_fields");
        assert_eq!(fields["p"][0], session_id);
    }

    /// Wait until the client has closed its side. Returns how many
    /// unread frames were discarded on the way.
    pub(crate) async fn closed(&mut self) -> usize {
        let mut skipped = 0;
        while self.from_client.recv().await.is_some() {
            skipped += 1;
        }
        skipped
    }

    /// A frame the client already sent, if any.
    pub(crate) fn try_next_raw(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }
}

/// Symbol argument of a `quote_add_symbols` command.
pub(crate) fn added_symbol(cmd: &Value) -> Option<&str> {
    if cmd["m"] != "quote_add_symbols" {
        return None;
    }
    cmd["p"][1].as_str()
}
