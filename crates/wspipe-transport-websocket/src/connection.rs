//! WebSocket implementation of the duplex connection

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::MaybeTlsStream;
use tracing::{debug, trace};
use wspipe_transport::{
    DuplexConnection, Message, MessageSink, MessageSource, TransportError, TransportResult,
    NO_STATUS_RECEIVED,
};

pub(crate) type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An established WebSocket tunnel
pub struct WebSocketConnection {
    /// Connection ID for logging
    connection_id: String,
    stream: WsStream,
}

impl std::fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnection")
            .field("connection_id", &self.connection_id)
            .finish()
    }
}

impl WebSocketConnection {
    pub(crate) fn new(stream: WsStream) -> Self {
        Self {
            connection_id: format!("ws-{}", uuid::Uuid::new_v4()),
            stream,
        }
    }
}

impl DuplexConnection for WebSocketConnection {
    type Sink = WebSocketSink;
    type Source = WebSocketSource;

    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn split(self) -> (WebSocketSink, WebSocketSource) {
        let (sink, source) = self.stream.split();
        (
            WebSocketSink {
                connection_id: self.connection_id.clone(),
                sink,
            },
            WebSocketSource {
                connection_id: self.connection_id,
                source,
            },
        )
    }
}

/// Sending half of a [`WebSocketConnection`]
pub struct WebSocketSink {
    connection_id: String,
    sink: SplitSink<WsStream, WsMessage>,
}

impl std::fmt::Debug for WebSocketSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketSink")
            .field("connection_id", &self.connection_id)
            .finish()
    }
}

#[async_trait]
impl MessageSink for WebSocketSink {
    async fn send_binary(&mut self, payload: Bytes) -> TransportResult<()> {
        trace!("[{}] Sending {} bytes", self.connection_id, payload.len());
        self.sink
            .send(WsMessage::Binary(payload.to_vec()))
            .await
            .map_err(map_ws_error)
    }

    async fn send_close(&mut self, timeout: Duration) -> TransportResult<()> {
        debug!("[{}] Sending close (normal closure)", self.connection_id);
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };

        let err = match tokio::time::timeout(timeout, self.sink.send(WsMessage::Close(Some(frame))))
            .await
        {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => map_ws_error(e),
            Err(_) => return Err(TransportError::Timeout),
        };

        if err.is_close_already_sent() {
            // The reply to a peer-initiated close may still be queued.
            let _ = tokio::time::timeout(timeout, self.sink.flush()).await;
        }
        Err(err)
    }
}

/// Receiving half of a [`WebSocketConnection`]
pub struct WebSocketSource {
    connection_id: String,
    source: SplitStream<WsStream>,
}

impl std::fmt::Debug for WebSocketSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketSource")
            .field("connection_id", &self.connection_id)
            .finish()
    }
}

#[async_trait]
impl MessageSource for WebSocketSource {
    async fn recv(&mut self) -> TransportResult<Message> {
        loop {
            match self.source.next().await {
                Some(Ok(WsMessage::Binary(data))) => {
                    trace!("[{}] Received {} bytes", self.connection_id, data.len());
                    return Ok(Message::Binary(Bytes::from(data)));
                }
                Some(Ok(WsMessage::Text(text))) => return Ok(Message::Text(text)),
                Some(Ok(WsMessage::Ping(_))) => {
                    // Pong is automatically handled by tungstenite
                    trace!("[{}] Received ping", self.connection_id);
                }
                Some(Ok(WsMessage::Pong(_))) => {
                    trace!("[{}] Received pong", self.connection_id);
                }
                Some(Ok(WsMessage::Frame(_))) => {}
                Some(Ok(WsMessage::Close(frame))) => {
                    debug!("[{}] WebSocket close received: {:?}", self.connection_id, frame);
                    return Err(match frame {
                        Some(frame) => TransportError::Closed {
                            code: u16::from(frame.code),
                            reason: frame.reason.into_owned(),
                        },
                        None => TransportError::Closed {
                            code: NO_STATUS_RECEIVED,
                            reason: String::new(),
                        },
                    });
                }
                Some(Err(e)) => return Err(map_ws_error(e)),
                None => return Err(TransportError::ConnectionClosed),
            }
        }
    }
}

fn map_ws_error(err: WsError) -> TransportError {
    match err {
        WsError::Protocol(ProtocolError::SendAfterClosing) | WsError::AlreadyClosed => {
            TransportError::CloseAlreadySent
        }
        WsError::ConnectionClosed => TransportError::ConnectionClosed,
        WsError::Io(e) => TransportError::IoError(e),
        WsError::Protocol(e) => TransportError::ProtocolError(e.to_string()),
        other => TransportError::ConnectionError(other.to_string()),
    }
}
