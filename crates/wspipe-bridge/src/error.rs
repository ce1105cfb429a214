//! Bridge errors

use thiserror::Error;
use wspipe_transport::TransportError;

/// Fatal conditions on either bridge direction
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The remote sent something other than a binary message
    #[error("non-binary websocket message received ({kind})")]
    NonBinaryMessage { kind: &'static str },

    #[error("reading from stdin: {0}")]
    LocalRead(#[source] std::io::Error),

    #[error("writing to stdout: {0}")]
    LocalWrite(#[source] std::io::Error),

    /// Receiving failed for any reason other than a normal closure
    #[error("receiving from remote: {0}")]
    RemoteReceive(#[source] TransportError),

    #[error("writing websocket message: {0}")]
    RemoteSend(#[source] TransportError),

    /// A direction task ended without reporting, e.g. it panicked
    #[error("bridge task failed: {0}")]
    TaskFailed(String),
}

impl BridgeError {
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::NonBinaryMessage { .. })
    }
}
