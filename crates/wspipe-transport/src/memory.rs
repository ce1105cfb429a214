//! In-process duplex connection
//!
//! [`pair`] returns a [`MemoryConnection`] for the client side and a
//! [`MemoryPeer`] that plays the remote endpoint. Used to drive the bridge
//! without sockets.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::{
    DuplexConnection, Message, MessageSink, MessageSource, TransportError, TransportResult,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// A frame travelling over an in-memory connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Binary(Bytes),
    Text(String),
    Close { code: u16, reason: String },
}

/// Create a connected client/peer pair
pub fn pair() -> (MemoryConnection, MemoryPeer) {
    let (to_peer_tx, to_peer_rx) = mpsc::unbounded_channel();
    let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
    let closing = Arc::new(AtomicBool::new(false));

    let connection = MemoryConnection {
        connection_id: format!("mem-{}", NEXT_ID.fetch_add(1, Ordering::Relaxed)),
        sink: MemorySink {
            tx: to_peer_tx,
            closing: closing.clone(),
        },
        source: MemorySource {
            rx: to_client_rx,
            closing,
        },
    };

    let peer = MemoryPeer {
        tx: to_client_tx,
        rx: to_peer_rx,
    };

    (connection, peer)
}

/// Client side of an in-memory connection
#[derive(Debug)]
pub struct MemoryConnection {
    connection_id: String,
    sink: MemorySink,
    source: MemorySource,
}

impl DuplexConnection for MemoryConnection {
    type Sink = MemorySink;
    type Source = MemorySource;

    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn split(self) -> (MemorySink, MemorySource) {
        (self.sink, self.source)
    }
}

#[derive(Debug)]
pub struct MemorySink {
    tx: mpsc::UnboundedSender<Frame>,
    /// Set once a close has been sent or received
    closing: Arc<AtomicBool>,
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn send_binary(&mut self, payload: Bytes) -> TransportResult<()> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(TransportError::CloseAlreadySent);
        }
        self.tx
            .send(Frame::Binary(payload))
            .map_err(|_| TransportError::ConnectionError("peer dropped".to_string()))
    }

    async fn send_close(&mut self, _timeout: Duration) -> TransportResult<()> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Err(TransportError::CloseAlreadySent);
        }
        self.tx
            .send(Frame::Close {
                code: crate::NORMAL_CLOSURE,
                reason: String::new(),
            })
            .map_err(|_| TransportError::ConnectionError("peer dropped".to_string()))
    }
}

#[derive(Debug)]
pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<Frame>,
    closing: Arc<AtomicBool>,
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn recv(&mut self) -> TransportResult<Message> {
        match self.rx.recv().await {
            Some(Frame::Binary(data)) => Ok(Message::Binary(data)),
            Some(Frame::Text(text)) => Ok(Message::Text(text)),
            Some(Frame::Close { code, reason }) => {
                self.closing.store(true, Ordering::SeqCst);
                Err(TransportError::Closed { code, reason })
            }
            None => Err(TransportError::ConnectionClosed),
        }
    }
}

/// Remote side of an in-memory connection
#[derive(Debug)]
pub struct MemoryPeer {
    tx: mpsc::UnboundedSender<Frame>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl MemoryPeer {
    pub fn send_binary(&self, payload: impl Into<Bytes>) {
        let _ = self.tx.send(Frame::Binary(payload.into()));
    }

    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.tx.send(Frame::Text(text.into()));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.tx.send(Frame::Close {
            code,
            reason: reason.to_string(),
        });
    }

    /// Next frame sent by the client, or `None` once the client side is gone
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Collect binary payloads until the client sends a close or disconnects.
    ///
    /// Returns the reassembled bytes and the close frame, if any.
    pub async fn collect_until_close(&mut self) -> (Vec<u8>, Option<Frame>) {
        let mut data = Vec::new();
        while let Some(frame) = self.rx.recv().await {
            match frame {
                Frame::Binary(chunk) => data.extend_from_slice(&chunk),
                close @ Frame::Close { .. } => return (data, Some(close)),
                Frame::Text(_) => {}
            }
        }
        (data, None)
    }
}
