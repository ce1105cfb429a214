//! Transport abstraction for the stdio tunnel
//!
//! The bridge only needs a handful of operations from the underlying
//! connection, so this crate describes them as traits and keeps the
//! WebSocket details in `wspipe-transport-websocket`.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │        wspipe-bridge (stdin <-> remote)       │
//! └──────────────────────────────────────────────┘
//!                       │ uses traits
//!                       ↓
//! ┌──────────────────────────────────────────────┐
//! │  wspipe-transport (this crate)                │
//! │  - DuplexConnection  - MessageSink/Source     │
//! │  - error taxonomy    - in-memory pair         │
//! └──────────────────────────────────────────────┘
//!                       │ implemented by
//!                       ↓
//! ┌──────────────────────────────────────────────┐
//! │  wspipe-transport-websocket                   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! A connection carries discrete messages. Every payload message is binary;
//! the peer ends the session with a close control message, and a close
//! carrying [`NORMAL_CLOSURE`] is the only clean way for it to do so.

pub mod error;
pub mod memory;

pub use error::{ConfigError, DialError, TransportError, TransportResult};

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Debug;
use std::time::Duration;

/// Close code for an intentional, successful end of session
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when the peer's close frame carried no status
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// A message received from the remote side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Tunnel payload
    Binary(Bytes),
    /// Text-framed message; never valid on a tunnel
    Text(String),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Binary(_) => "binary",
            Self::Text(_) => "text",
        }
    }
}

/// Sending half of a duplex connection
#[async_trait]
pub trait MessageSink: Send + Debug {
    /// Send one chunk of payload as a binary message
    async fn send_binary(&mut self, payload: Bytes) -> TransportResult<()>;

    /// Send a normal-closure control message, giving up after `timeout`.
    ///
    /// Fails with [`TransportError::CloseAlreadySent`] when a close is
    /// already in flight on this connection.
    async fn send_close(&mut self, timeout: Duration) -> TransportResult<()>;
}

/// Receiving half of a duplex connection
#[async_trait]
pub trait MessageSource: Send + Debug {
    /// Receive the next data message.
    ///
    /// Control traffic (ping/pong) is handled by the transport. A close
    /// from the peer is reported as [`TransportError::Closed`]; see
    /// [`TransportError::is_normal_closure`].
    async fn recv(&mut self) -> TransportResult<Message>;
}

/// An established message-oriented duplex connection
pub trait DuplexConnection: Send + Debug {
    type Sink: MessageSink + 'static;
    type Source: MessageSource + 'static;

    /// Identifier used in log lines
    fn connection_id(&self) -> &str;

    /// Split into independently usable sending and receiving halves
    fn split(self) -> (Self::Sink, Self::Source);
}
