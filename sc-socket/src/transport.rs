//! Physical socket abstraction.
//!
//! A [`Transport`] opens one duplex connection; it never retries. All retry
//! policy lives in the connection manager, which only sees the events below.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use sc_core::error::{ApiError, ChatError, ChatResult};

/// What a physical socket reports.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// One text frame.
    Message(String),
    /// The peer closed the socket.
    Close { code: u16, reason: String },
    /// The socket failed.
    Error(String),
}

/// One open physical connection.
#[async_trait]
pub trait Socket: Send {
    /// Next event, or `None` once the socket is finished.
    async fn recv(&mut self) -> Option<TransportEvent>;

    async fn send(&mut self, text: String) -> ChatResult<()>;

    async fn close(&mut self, code: u16, reason: &str) -> ChatResult<()>;
}

/// Opens physical connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a socket to `url`.
    ///
    /// A refused upgrade with status 401/403 is reported as `ChatError::Api`
    /// so the manager can tell authentication failures from network ones.
    async fn open(&self, url: &str) -> ChatResult<Box<dyn Socket>>;
}

/// WebSocket transport over tokio-tungstenite.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteTransport;

impl TungsteniteTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn open(&self, url: &str) -> ChatResult<Box<dyn Socket>> {
        match connect_async(url).await {
            Ok((stream, _)) => {
                debug!("websocket upgrade complete");
                Ok(Box::new(TungsteniteSocket { stream }))
            }
            Err(tungstenite::Error::Http(response)) => {
                let status = response.status().as_u16();
                let body = response
                    .body()
                    .as_ref()
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_default();
                let mut error = serde_json::from_str::<ApiError>(&body)
                    .unwrap_or_else(|_| ApiError::from_status(status, &body));
                error.status = status;
                if error.is_auth() {
                    Err(ChatError::Api(error))
                } else {
                    Err(ChatError::Socket(format!("websocket upgrade failed: {error}")))
                }
            }
            Err(e) => Err(ChatError::Socket(format!("websocket connect failed: {e}"))),
        }
    }
}

struct TungsteniteSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Socket for TungsteniteSocket {
    async fn recv(&mut self) -> Option<TransportEvent> {
        loop {
            let frame = self.stream.next().await?;
            return match frame {
                Ok(Message::Text(text)) => Some(TransportEvent::Message(text.to_string())),
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => Some(TransportEvent::Message(text)),
                    Err(_) => continue,
                },
                Ok(Message::Close(frame)) => Some(match frame {
                    Some(f) => TransportEvent::Close {
                        code: f.code.into(),
                        reason: f.reason.to_string(),
                    },
                    None => TransportEvent::Close {
                        code: 1005,
                        reason: String::new(),
                    },
                }),
                // tungstenite answers pings itself
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
                Err(e) => Some(TransportEvent::Error(e.to_string())),
            };
        }
    }

    async fn send(&mut self, text: String) -> ChatResult<()> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ChatError::Socket(format!("send failed: {e}")))
    }

    async fn close(&mut self, code: u16, reason: &str) -> ChatResult<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.stream
            .close(Some(frame))
            .await
            .map_err(|e| ChatError::Socket(format!("close failed: {e}")))
    }
}
