//! Error taxonomy shared by every transport

use thiserror::Error;

use crate::NORMAL_CLOSURE;

/// Errors on an established connection
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer sent a close control message
    #[error("websocket: close {code} {reason}")]
    Closed { code: u16, reason: String },

    /// A close control message has already been sent on this connection
    #[error("websocket: close sent")]
    CloseAlreadySent,

    /// The connection ended without a close handshake
    #[error("Connection closed without close handshake")]
    ConnectionClosed,

    #[error("Timeout")]
    Timeout,

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the peer ended the session intentionally
    pub fn is_normal_closure(&self) -> bool {
        matches!(self, Self::Closed { code, .. } if *code == NORMAL_CLOSURE)
    }

    pub fn is_close_already_sent(&self) -> bool {
        matches!(self, Self::CloseAlreadySent)
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors while assembling the dial configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Error parsing URL {url:?}: {reason}")]
    UrlParse { url: String, reason: String },

    #[error("Unsupported scheme {scheme:?} in {url:?} (expected {expected})")]
    UnsupportedScheme {
        url: String,
        scheme: String,
        expected: &'static str,
    },

    #[error("Failed to load client certificate: {0}")]
    CertificateLoad(String),

    #[error("Invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },
}

/// Errors while establishing the connection
#[derive(Debug, Error)]
pub enum DialError {
    /// The endpoint answered the upgrade request with a plain HTTP response
    #[error(
        "{url}: HTTP error: {status} {reason}{}",
        .body.as_deref().map(|b| format!("\nBody:\n{b}")).unwrap_or_default()
    )]
    HttpRejection {
        url: String,
        status: u16,
        reason: String,
        body: Option<String>,
    },

    /// No HTTP response was obtained (DNS, TCP, proxy, TLS, handshake I/O)
    #[error("Dial to {url:?} fail: {reason}")]
    TransportRejection { url: String, reason: String },
}

impl DialError {
    /// Status code of an HTTP rejection
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpRejection { status, .. } => Some(*status),
            Self::TransportRejection { .. } => None,
        }
    }
}
