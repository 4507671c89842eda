//! Transport seam for the push connection.
//!
//! [`ConnectionManager`](crate::connection::ConnectionManager) only sees the
//! [`Transport`] and [`Link`] traits; [`WsTransport`] speaks Socket.IO over
//! `tokio-tungstenite`, tests substitute scripted fakes.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use freqdash_core::SyncError;

use crate::codec::{self, Heartbeat, Packet};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close reasons reported through the `disconnect` event.
pub mod reason {
    pub const SERVER_DISCONNECT: &str = "io server disconnect";
    pub const CLIENT_DISCONNECT: &str = "io client disconnect";
    pub const TRANSPORT_CLOSE: &str = "transport close";
    pub const PING_TIMEOUT: &str = "ping timeout";
}

/// What a live link yields.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    Event { name: String, payload: Value },
    /// The link is gone. No further items follow.
    Closed { reason: String },
}

/// Opens links to the push endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, url: &str) -> Result<Box<dyn Link>, SyncError>;
}

/// One established connection.
#[async_trait]
pub trait Link: Send {
    async fn next(&mut self) -> Inbound;
    async fn send(&mut self, event: &str, payload: Value) -> Result<(), SyncError>;
    async fn close(&mut self);
}

/// Socket.IO client transport over a websocket.
#[derive(Clone, Debug)]
pub struct WsTransport {
    connect_timeout: Duration,
}

impl WsTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, url: &str) -> Result<Box<dyn Link>, SyncError> {
        let endpoint = codec::socket_io_url(url);
        debug!(endpoint = %endpoint, "opening push connection");

        let handshake = async {
            let (ws, _) = connect_async(endpoint.as_str())
                .await
                .map_err(|e| SyncError::Connection(e.to_string()))?;
            let mut link = WsLink {
                ws,
                heartbeat: Heartbeat::default(),
            };
            link.handshake().await?;
            Ok::<_, SyncError>(link)
        };

        let link = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| SyncError::Timeout(self.connect_timeout))??;
        Ok(Box::new(link))
    }
}

struct WsLink {
    ws: WsStream,
    heartbeat: Heartbeat,
}

impl WsLink {
    /// Wait for the Engine.IO open packet, join the default namespace, and
    /// wait for the ack.
    async fn handshake(&mut self) -> Result<(), SyncError> {
        loop {
            match self.read_packet().await? {
                Packet::Open(data) => {
                    self.heartbeat = Heartbeat::from_handshake(&data);
                    break;
                }
                Packet::Ping => self.write(codec::encode_pong()).await?,
                other => trace!(?other, "ignoring frame before open"),
            }
        }

        self.write(codec::encode_connect()).await?;

        loop {
            match self.read_packet().await? {
                Packet::Connect(_) => {
                    debug!(
                        ping_interval_ms = self.heartbeat.ping_interval_ms,
                        ping_timeout_ms = self.heartbeat.ping_timeout_ms,
                        "namespace joined"
                    );
                    return Ok(());
                }
                Packet::ConnectError(message) => return Err(SyncError::Connection(message)),
                Packet::Ping => self.write(codec::encode_pong()).await?,
                Packet::Close | Packet::Disconnect => {
                    return Err(SyncError::Connection("closed during handshake".into()));
                }
                other => trace!(?other, "ignoring frame before connect ack"),
            }
        }
    }

    async fn read_packet(&mut self) -> Result<Packet, SyncError> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return codec::decode(text.as_str()),
                Some(Ok(Message::Close(_))) | None => {
                    return Err(SyncError::Connection("socket closed during handshake".into()));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(SyncError::Transport(e.to_string())),
            }
        }
    }

    async fn write(&mut self, frame: String) -> Result<(), SyncError> {
        self.ws
            .send(Message::text(frame))
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))
    }
}

#[async_trait]
impl Link for WsLink {
    async fn next(&mut self) -> Inbound {
        let liveness = self.heartbeat.liveness();
        loop {
            let frame = match tokio::time::timeout(liveness, self.ws.next()).await {
                Err(_) => return closed(reason::PING_TIMEOUT),
                Ok(None) | Ok(Some(Ok(Message::Close(_)))) => return closed(reason::TRANSPORT_CLOSE),
                Ok(Some(Err(e))) => return closed(&format!("transport error: {e}")),
                Ok(Some(Ok(Message::Text(text)))) => text,
                Ok(Some(Ok(_))) => continue,
            };

            match codec::decode(frame.as_str()) {
                Ok(Packet::Event { name, payload }) => return Inbound::Event { name, payload },
                Ok(Packet::Ping) => {
                    if let Err(e) = self.write(codec::encode_pong()).await {
                        return closed(&e.to_string());
                    }
                }
                Ok(Packet::Disconnect) => return closed(reason::SERVER_DISCONNECT),
                Ok(Packet::Close) => return closed(reason::TRANSPORT_CLOSE),
                Ok(other) => trace!(?other, "ignoring control frame"),
                Err(e) => warn!(error = %e, "dropping undecodable frame"),
            }
        }
    }

    async fn send(&mut self, event: &str, payload: Value) -> Result<(), SyncError> {
        self.write(codec::encode_event(event, &payload)).await
    }

    async fn close(&mut self) {
        let _ = self.write(codec::encode_disconnect()).await;
        let _ = self.ws.close(None).await;
    }
}

fn closed(reason: &str) -> Inbound {
    Inbound::Closed {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// Minimal Socket.IO server: handshake, then run `script` against the socket.
    async fn serve_once<F, Fut>(handshake: &'static str, script: F) -> String
    where
        F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.send(Message::text(handshake)).await.unwrap();
            script(ws).await;
        });
        format!("ws://{addr}")
    }

    async fn expect_text(ws: &mut WebSocketStream<TcpStream>) -> String {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return text.as_str().to_string(),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn handshake_events_and_server_disconnect() {
        let url = serve_once(r#"0{"sid":"s1","pingInterval":25000,"pingTimeout":20000}"#, |mut ws| async move {
            assert_eq!(expect_text(&mut ws).await, "40");
            ws.send(Message::text(r#"40{"sid":"n1"}"#)).await.unwrap();
            ws.send(Message::text("2")).await.unwrap();
            assert_eq!(expect_text(&mut ws).await, "3");
            ws.send(Message::text(r#"42["trade_update",{"pair":"BTC/USDT"}]"#)).await.unwrap();
            ws.send(Message::text("41")).await.unwrap();
            let _ = ws.next().await;
        })
        .await;

        let transport = WsTransport::new(Duration::from_secs(5));
        let mut link = transport.open(&url).await.unwrap();

        assert_eq!(
            link.next().await,
            Inbound::Event {
                name: "trade_update".into(),
                payload: json!({"pair": "BTC/USDT"})
            }
        );
        assert_eq!(
            link.next().await,
            Inbound::Closed {
                reason: reason::SERVER_DISCONNECT.into()
            }
        );
    }

    #[tokio::test]
    async fn outbound_events_are_framed() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let url = serve_once(r#"0{"sid":"s2"}"#, |mut ws| async move {
            assert_eq!(expect_text(&mut ws).await, "40");
            ws.send(Message::text("40")).await.unwrap();
            let frame = expect_text(&mut ws).await;
            let _ = tx.send(frame);
        })
        .await;

        let mut link = WsTransport::default().open(&url).await.unwrap();
        link.send("subscribe", json!({"room": "trades"})).await.unwrap();
        assert_eq!(rx.await.unwrap(), r#"42["subscribe",{"room":"trades"}]"#);
    }

    #[tokio::test]
    async fn connect_error_fails_open() {
        let url = serve_once(r#"0{"sid":"s3"}"#, |mut ws| async move {
            assert_eq!(expect_text(&mut ws).await, "40");
            ws.send(Message::text(r#"44{"message":"Not authorized"}"#)).await.unwrap();
            let _ = ws.next().await;
        })
        .await;

        let err = WsTransport::default().open(&url).await.err().unwrap();
        assert_eq!(err.to_string(), "connection failed: Not authorized");
    }

    #[tokio::test]
    async fn refused_connection_is_a_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = WsTransport::default().open(&format!("ws://{addr}")).await.err().unwrap();
        assert!(err.is_connection_failure(), "{err:?}");
    }
}
