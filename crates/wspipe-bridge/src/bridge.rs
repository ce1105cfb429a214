//! The two bridge directions and the task wiring around them
//!
//! Each direction runs in its own task and reports its end to the
//! coordinator over a channel. The local->remote task hands the sending
//! half back with its report, so the close control message is only ever sent
//! from the coordinator.

use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use wspipe_transport::{DuplexConnection, Message, MessageSink, MessageSource};

use crate::error::BridgeError;
use crate::shutdown::{BridgeOutcome, Direction, ShutdownCoordinator};

/// Size of each read from local input
pub const READ_CHUNK_SIZE: usize = 32 * 1024;

/// Default bound on sending the close control message
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bridge tuning
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Bound on sending the close control message (and on waiting for the
    /// peer's acknowledgement afterwards)
    pub write_timeout: Duration,
    pub read_chunk_size: usize,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            read_chunk_size: READ_CHUNK_SIZE,
        }
    }
}

/// Forward remote messages to local output until a normal closure.
///
/// Every message must be binary; each payload is written in full and
/// flushed before the next message is received.
pub async fn remote_to_local<S, W>(source: &mut S, output: &mut W) -> Result<(), BridgeError>
where
    S: MessageSource + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    loop {
        let payload = match source.recv().await {
            Ok(Message::Binary(payload)) => payload,
            Ok(other) => {
                return Err(BridgeError::NonBinaryMessage { kind: other.kind() });
            }
            Err(e) if e.is_normal_closure() => {
                debug!("Remote closed the connection normally");
                return Ok(());
            }
            Err(e) => return Err(BridgeError::RemoteReceive(e)),
        };

        output
            .write_all(&payload)
            .await
            .map_err(BridgeError::LocalWrite)?;
        output.flush().await.map_err(BridgeError::LocalWrite)?;
    }
}

/// Forward local input to the remote as binary messages until EOF.
pub async fn local_to_remote<R, K>(
    input: &mut R,
    sink: &mut K,
    chunk_size: usize,
) -> Result<(), BridgeError>
where
    R: AsyncRead + Unpin + ?Sized,
    K: MessageSink + ?Sized,
{
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        let n = input.read(&mut buf).await.map_err(BridgeError::LocalRead)?;
        if n == 0 {
            debug!("Local input reached EOF");
            return Ok(());
        }

        sink.send_binary(Bytes::copy_from_slice(&buf[..n]))
            .await
            .map_err(BridgeError::RemoteSend)?;
    }
}

enum DirectionEvent<K> {
    RemoteEnded(Result<(), BridgeError>),
    LocalEnded {
        sink: K,
        result: Result<(), BridgeError>,
    },
}

/// Bridge `connection` with local `input`/`output` until shutdown.
///
/// Returns once the coordinator reaches its final state. A direction still
/// blocked at that point is abandoned. A direction task that dies without
/// reporting (a panic) is fatal.
pub async fn run<C, R, W>(
    connection: C,
    input: R,
    output: W,
    options: BridgeOptions,
) -> BridgeOutcome
where
    C: DuplexConnection,
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    info!("[{}] Bridging stdio", connection.connection_id());
    let (sink, source) = connection.split();

    let mut coordinator = ShutdownCoordinator::new(options.write_timeout);
    let (event_tx, mut event_rx) = mpsc::channel::<DirectionEvent<C::Sink>>(2);

    let mut remote_task = {
        let cancel = coordinator.cancellation_token();
        let event_tx = event_tx.clone();
        tokio::spawn(async move {
            let mut source = source;
            let mut output = output;
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = remote_to_local(&mut source, &mut output) => result,
            };
            let _ = event_tx.send(DirectionEvent::RemoteEnded(result)).await;
        })
    };

    let mut local_task = {
        let cancel = coordinator.cancellation_token();
        let chunk_size = options.read_chunk_size;
        tokio::spawn(async move {
            let mut sink = sink;
            let mut input = input;
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = local_to_remote(&mut input, &mut sink, chunk_size) => result,
            };
            let _ = event_tx
                .send(DirectionEvent::LocalEnded { sink, result })
                .await;
        })
    };

    let mut remote_running = true;
    let mut remote_joined = false;
    let mut local_joined = false;
    loop {
        // Events first: a task that returned normally has already sent one.
        let event = tokio::select! {
            biased;
            Some(event) = event_rx.recv() => event,
            joined = &mut remote_task, if !remote_joined => {
                remote_joined = true;
                match joined {
                    Ok(()) => continue,
                    Err(e) => {
                        let err = BridgeError::TaskFailed(e.to_string());
                        coordinator.on_fatal(Direction::RemoteToLocal, err);
                        break;
                    }
                }
            }
            joined = &mut local_task, if !local_joined => {
                local_joined = true;
                match joined {
                    Ok(()) => continue,
                    Err(e) => {
                        let err = BridgeError::TaskFailed(e.to_string());
                        coordinator.on_fatal(Direction::LocalToRemote, err);
                        break;
                    }
                }
            }
            else => {
                let direction = if remote_running {
                    Direction::RemoteToLocal
                } else {
                    Direction::LocalToRemote
                };
                coordinator.on_fatal(
                    direction,
                    BridgeError::TaskFailed("ended without reporting".to_string()),
                );
                break;
            }
        };

        match event {
            DirectionEvent::RemoteEnded(Ok(())) => {
                coordinator.on_remote_closed();
                remote_running = false;
            }
            DirectionEvent::RemoteEnded(Err(e)) => {
                coordinator.on_fatal(Direction::RemoteToLocal, e);
                break;
            }
            DirectionEvent::LocalEnded {
                mut sink,
                result: Ok(()),
            } => {
                let close_sent = coordinator.on_local_eof(&mut sink).await;
                if close_sent && remote_running {
                    await_close_ack(&mut coordinator, &mut event_rx).await;
                }
                break;
            }
            DirectionEvent::LocalEnded { result: Err(e), .. } => {
                coordinator.on_fatal(Direction::LocalToRemote, e);
                break;
            }
        }
    }

    remote_task.abort();
    local_task.abort();
    coordinator.finish()
}

/// After our close, let the remote direction drain until the peer
/// acknowledges, bounded by the write timeout.
///
/// Receive failures here are the connection winding down and are not
/// fatal; protocol violations and local write failures still are.
async fn await_close_ack<K>(
    coordinator: &mut ShutdownCoordinator,
    event_rx: &mut mpsc::Receiver<DirectionEvent<K>>,
) {
    match tokio::time::timeout(coordinator.write_timeout(), event_rx.recv()).await {
        Ok(Some(DirectionEvent::RemoteEnded(Ok(())))) => {
            coordinator.on_remote_closed();
            debug!("Close acknowledged by remote");
        }
        Ok(Some(DirectionEvent::RemoteEnded(Err(BridgeError::RemoteReceive(e))))) => {
            debug!("Connection ended while closing: {}", e);
        }
        Ok(Some(DirectionEvent::RemoteEnded(Err(e)))) => {
            coordinator.on_fatal(Direction::RemoteToLocal, e);
        }
        Ok(Some(DirectionEvent::LocalEnded { .. })) => {}
        Ok(None) => {
            let err = BridgeError::TaskFailed("ended without reporting".to_string());
            coordinator.on_fatal(Direction::RemoteToLocal, err);
        }
        Err(_) => warn!("No close acknowledgement within {:?}", coordinator.write_timeout()),
    }
}
