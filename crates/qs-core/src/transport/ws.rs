//! WebSocket transport over `tokio-tungstenite`.

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use super::{Frame, FrameSink, FrameStream, Session, Transport};
use crate::error::{QsError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production transport: one TLS WebSocket per session.
#[derive(Debug, Clone, Default)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, url: &str, headers: &HashMap<String, String>) -> Result<Session> {
        // into_client_request fills in Host and the upgrade/key/version headers
        let mut request = url.into_client_request()?;
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| QsError::Connection(format!("header {key}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| QsError::Connection(format!("header {key}: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let (stream, response) = tokio_tungstenite::connect_async(request).await?;
        info!("[ws] connected to {} (status {})", display_host(url), response.status());

        let (write, read) = stream.split();
        let sink = WsSink {
            write,
            active: true,
        };
        Ok(Session {
            sink: Box::new(sink),
            stream: Box::new(WsFrames { read }),
        })
    }
}

struct WsSink {
    write: SplitSink<WsStream, Message>,
    active: bool,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, text: String) -> Result<()> {
        if let Err(e) = self.write.send(Message::Text(text.into())).await {
            self.active = false;
            return Err(e.into());
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.active = false;
        self.write.close().await?;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

struct WsFrames {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl FrameStream for WsFrames {
    async fn receive(&mut self) -> Option<Result<Frame>> {
        let frame = match self.read.next().await? {
            Ok(Message::Text(text)) => Frame::Text(text.to_string()),
            Ok(Message::Close(reason)) => {
                debug!("[ws] close frame: {reason:?}");
                Frame::Close
            }
            // tungstenite answers pings itself on the next read/write
            Ok(_) => Frame::Other,
            Err(e) => return Some(Err(e.into())),
        };
        Some(Ok(frame))
    }
}

/// Host part of a URL, for log lines.
fn display_host(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.host_str().unwrap_or("").to_string())
        .unwrap_or_default()
}
