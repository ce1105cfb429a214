//! Shutdown coordination
//!
//! ```text
//! RUNNING ──local EOF──▶ LOCAL_EOF_PENDING_CLOSE ──close sent──▶ CLOSED
//! RUNNING ──remote normal closure──▶ REMOTE_CLOSED
//! RUNNING ──fatal error──▶ FATAL_ERROR ──▶ CLOSED
//! ```
//!
//! `REMOTE_CLOSED` keeps waiting for the local direction, which still ends
//! through local EOF or a fatal error. Any fatal error raises the shared
//! cancellation token; the exit status is non-zero exactly when it was
//! raised.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use wspipe_transport::{MessageSink, TransportError};

use crate::error::BridgeError;

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    LocalEofPendingClose,
    RemoteClosed,
    FatalError,
    Closed,
}

/// Terminal condition of one bridge direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionState {
    Running,
    /// Local EOF or remote normal closure
    Finished,
    Failed,
}

/// Which bridge direction reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    LocalToRemote,
    RemoteToLocal,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalToRemote => f.write_str("local->remote"),
            Self::RemoteToLocal => f.write_str("remote->local"),
        }
    }
}

/// Per-direction terminal conditions, read once when the bridge finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeState {
    pub local_to_remote: DirectionState,
    pub remote_to_local: DirectionState,
}

impl BridgeState {
    fn running() -> Self {
        Self {
            local_to_remote: DirectionState::Running,
            remote_to_local: DirectionState::Running,
        }
    }

    fn set(&mut self, direction: Direction, state: DirectionState) {
        match direction {
            Direction::LocalToRemote => self.local_to_remote = state,
            Direction::RemoteToLocal => self.remote_to_local = state,
        }
    }
}

/// Result of a finished bridge
#[derive(Debug)]
pub struct BridgeOutcome {
    pub state: ShutdownState,
    pub bridge: BridgeState,
    /// First fatal error, if any
    pub error: Option<BridgeError>,
    cancelled: bool,
}

impl BridgeOutcome {
    /// Whether the cancellation signal stayed lowered
    pub fn is_success(&self) -> bool {
        !self.cancelled
    }

    /// Process exit status: 0 on clean shutdown, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// Drives the close handshake and decides the final status
#[derive(Debug)]
pub struct ShutdownCoordinator {
    write_timeout: Duration,
    cancel: CancellationToken,
    state: ShutdownState,
    bridge: BridgeState,
    error: Option<BridgeError>,
}

impl ShutdownCoordinator {
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            write_timeout,
            cancel: CancellationToken::new(),
            state: ShutdownState::Running,
            bridge: BridgeState::running(),
            error: None,
        }
    }

    /// Shared cancellation signal handed to both directions
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> ShutdownState {
        self.state
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    fn transition(&mut self, next: ShutdownState) {
        debug!("Shutdown state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// The remote ended the session with a normal closure.
    ///
    /// The local direction keeps running.
    pub fn on_remote_closed(&mut self) {
        self.bridge
            .set(Direction::RemoteToLocal, DirectionState::Finished);
        if self.state == ShutdownState::Running {
            self.transition(ShutdownState::RemoteClosed);
        }
    }

    /// A direction hit a fatal error: raise cancellation.
    pub fn on_fatal(&mut self, direction: Direction, err: BridgeError) {
        error!("{}: {}", direction, err);
        self.bridge.set(direction, DirectionState::Failed);
        self.cancel.cancel();
        if self.error.is_none() {
            self.error = Some(err);
        }
        self.transition(ShutdownState::FatalError);
    }

    /// Local input reached EOF: send the close control message.
    ///
    /// The send is bounded by the write timeout. A close already in flight
    /// is not an error; other send failures (the timeout included) are
    /// logged and leave the exit status alone. Returns whether this call put
    /// a new close on the wire.
    pub async fn on_local_eof<K>(&mut self, sink: &mut K) -> bool
    where
        K: MessageSink + ?Sized,
    {
        self.bridge
            .set(Direction::LocalToRemote, DirectionState::Finished);
        self.transition(ShutdownState::LocalEofPendingClose);

        let sent = tokio::time::timeout(self.write_timeout, sink.send_close(self.write_timeout))
            .await
            .unwrap_or(Err(TransportError::Timeout));

        match sent {
            Ok(()) => true,
            Err(e) if e.is_close_already_sent() => {
                debug!("Close already sent");
                false
            }
            Err(e) => {
                error!("Error sending 'close' message: {}", e);
                false
            }
        }
    }

    pub fn finish(mut self) -> BridgeOutcome {
        self.transition(ShutdownState::Closed);
        BridgeOutcome {
            state: self.state,
            bridge: self.bridge,
            error: self.error,
            cancelled: self.cancel.is_cancelled(),
        }
    }
}
