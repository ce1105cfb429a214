//! Full-duplex bridge between local stdio and a tunnel connection
//!
//! Two independent tasks move bytes:
//!
//! - **remote -> local**: every binary message is written to local output
//!   in receipt order. A normal closure ends this direction cleanly; a
//!   non-binary message or any other receive error is fatal.
//! - **local -> remote**: local input is read in chunks and sent as binary
//!   messages. EOF is the expected end and triggers the close handshake; a
//!   read error is fatal.
//!
//! The [`ShutdownCoordinator`] observes both and decides the exit status.
//! Raising its cancellation token stops both directions.

pub mod bridge;
pub mod error;
pub mod shutdown;

pub use bridge::{
    local_to_remote, remote_to_local, run, BridgeOptions, DEFAULT_WRITE_TIMEOUT, READ_CHUNK_SIZE,
};
pub use error::BridgeError;
pub use shutdown::{
    BridgeOutcome, BridgeState, Direction, DirectionState, ShutdownCoordinator, ShutdownState,
};
