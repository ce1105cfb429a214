//! Bridge scenarios over an in-memory connection
//!
//! Local stdio is simulated with `tokio::io::duplex`; the remote endpoint is
//! a `MemoryPeer`.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::time::timeout;
use wspipe_bridge::{run, BridgeError, BridgeOptions, DirectionState, ShutdownState};
use wspipe_transport::memory::{self, Frame, MemorySink};
use wspipe_transport::{
    DuplexConnection, Message, MessageSource, TransportResult, NORMAL_CLOSURE,
};

fn options(write_timeout: Duration) -> BridgeOptions {
    BridgeOptions {
        write_timeout,
        ..Default::default()
    }
}

/// Deterministic, non-repeating-looking test payload
fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

struct FailingReader;

impl AsyncRead for FailingReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin gone")))
    }
}

struct FailingWriter;

impl AsyncWrite for FailingWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdout gone")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[derive(Debug)]
struct PanickingSource;

#[async_trait]
impl MessageSource for PanickingSource {
    async fn recv(&mut self) -> TransportResult<Message> {
        panic!("receive loop crashed");
    }
}

/// Memory sink paired with a source that panics on first receive
#[derive(Debug)]
struct CrashingConnection {
    sink: MemorySink,
}

impl DuplexConnection for CrashingConnection {
    type Sink = MemorySink;
    type Source = PanickingSource;

    fn connection_id(&self) -> &str {
        "crashing"
    }

    fn split(self) -> (MemorySink, PanickingSource) {
        (self.sink, PanickingSource)
    }
}

#[tokio::test]
async fn test_local_eof_sends_close_and_exits_zero() {
    let (conn, mut peer) = memory::pair();
    let (mut stdin_writer, stdin) = tokio::io::duplex(1024);
    let (stdout, _stdout_reader) = tokio::io::duplex(1024);

    let bridge = tokio::spawn(run(conn, stdin, stdout, options(Duration::from_secs(5))));

    stdin_writer.write_all(b"hello").await.unwrap();
    drop(stdin_writer);

    let (received, close) = timeout(Duration::from_secs(5), peer.collect_until_close())
        .await
        .expect("close should be sent within the write timeout");
    assert_eq!(received, b"hello");
    assert_eq!(
        close,
        Some(Frame::Close {
            code: NORMAL_CLOSURE,
            reason: String::new()
        })
    );

    // Acknowledge the close like a real endpoint would.
    peer.close(NORMAL_CLOSURE, "");

    let outcome = timeout(Duration::from_secs(5), bridge)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.state, ShutdownState::Closed);
    assert_eq!(outcome.bridge.local_to_remote, DirectionState::Finished);
    assert_eq!(outcome.bridge.remote_to_local, DirectionState::Finished);
    assert!(outcome.error.is_none());
}

#[tokio::test]
async fn test_unacknowledged_close_still_exits_zero() {
    let (conn, mut peer) = memory::pair();
    let (stdin_writer, stdin) = tokio::io::duplex(1024);
    let (stdout, _stdout_reader) = tokio::io::duplex(1024);
    drop(stdin_writer);

    let outcome = timeout(
        Duration::from_secs(5),
        run(conn, stdin, stdout, options(Duration::from_millis(100))),
    )
    .await
    .unwrap();
    assert!(outcome.is_success());

    let (received, close) = peer.collect_until_close().await;
    assert!(received.is_empty());
    assert!(close.is_some());
}

#[tokio::test]
async fn test_local_bytes_arrive_in_order() {
    let (conn, mut peer) = memory::pair();
    let (mut stdin_writer, stdin) = tokio::io::duplex(4096);
    let (stdout, _stdout_reader) = tokio::io::duplex(1024);

    let bridge = tokio::spawn(run(
        conn,
        stdin,
        stdout,
        BridgeOptions {
            write_timeout: Duration::from_millis(200),
            read_chunk_size: 1000,
        },
    ));

    let payload = pattern(300_000);
    let writer = {
        let payload = payload.clone();
        tokio::spawn(async move {
            for chunk in payload.chunks(7919) {
                stdin_writer.write_all(chunk).await.unwrap();
            }
        })
    };

    let (received, close) = timeout(Duration::from_secs(10), peer.collect_until_close())
        .await
        .unwrap();
    writer.await.unwrap();
    assert_eq!(received.len(), payload.len());
    assert_eq!(received, payload);
    assert!(close.is_some());

    let outcome = bridge.await.unwrap();
    assert!(outcome.is_success());
}

#[tokio::test]
async fn test_remote_messages_written_in_order() {
    let (conn, peer) = memory::pair();
    let (stdin_writer, stdin) = tokio::io::duplex(1024);
    let (stdout, mut stdout_reader) = tokio::io::duplex(64 * 1024);

    let bridge = tokio::spawn(run(conn, stdin, stdout, options(Duration::from_secs(1))));

    let mut expected = Vec::new();
    for i in 0..200u32 {
        let message = format!("message-{i};").repeat((i % 7 + 1) as usize);
        expected.extend_from_slice(message.as_bytes());
        peer.send_binary(message.into_bytes());
    }

    let mut received = vec![0u8; expected.len()];
    timeout(Duration::from_secs(5), stdout_reader.read_exact(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, expected);

    peer.close(NORMAL_CLOSURE, "");
    drop(stdin_writer);

    let outcome = timeout(Duration::from_secs(5), bridge)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.exit_code(), 0);
}

#[tokio::test]
async fn test_text_message_is_fatal_regardless_of_local_input() {
    let (conn, peer) = memory::pair();
    // Local input stays open and idle for the whole test.
    let (_stdin_writer, stdin) = tokio::io::duplex(1024);
    let (stdout, _stdout_reader) = tokio::io::duplex(1024);

    peer.send_text("not allowed");

    let outcome = timeout(
        Duration::from_secs(5),
        run(conn, stdin, stdout, options(Duration::from_secs(10))),
    )
    .await
    .expect("protocol violation must end the bridge immediately");

    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(outcome.state, ShutdownState::Closed);
    assert_eq!(outcome.bridge.remote_to_local, DirectionState::Failed);
    assert!(matches!(
        outcome.error,
        Some(BridgeError::NonBinaryMessage { kind: "text" })
    ));
}

#[tokio::test]
async fn test_remote_normal_closure_leaves_local_direction_running() {
    let (conn, mut peer) = memory::pair();
    let (stdin_writer, stdin) = tokio::io::duplex(1024);
    let (stdout, _stdout_reader) = tokio::io::duplex(1024);

    let mut bridge = tokio::spawn(run(conn, stdin, stdout, options(Duration::from_secs(1))));

    peer.close(NORMAL_CLOSURE, "done");

    // The bridge keeps waiting on local input.
    assert!(timeout(Duration::from_millis(200), &mut bridge)
        .await
        .is_err());

    drop(stdin_writer);
    let outcome = timeout(Duration::from_secs(5), bridge)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.exit_code(), 0);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.bridge.remote_to_local, DirectionState::Finished);

    // The close was already in flight, so no second one went out.
    drop(outcome);
    assert_eq!(peer.recv().await, None);
}

#[tokio::test]
async fn test_abnormal_remote_close_is_fatal() {
    let (conn, peer) = memory::pair();
    let (_stdin_writer, stdin) = tokio::io::duplex(1024);
    let (stdout, _stdout_reader) = tokio::io::duplex(1024);

    peer.close(1011, "internal error");

    let outcome = timeout(
        Duration::from_secs(5),
        run(conn, stdin, stdout, options(Duration::from_secs(1))),
    )
    .await
    .unwrap();
    assert_eq!(outcome.exit_code(), 1);
    assert!(matches!(outcome.error, Some(BridgeError::RemoteReceive(_))));
}

#[tokio::test]
async fn test_dropped_connection_is_fatal() {
    let (conn, peer) = memory::pair();
    let (_stdin_writer, stdin) = tokio::io::duplex(1024);
    let (stdout, _stdout_reader) = tokio::io::duplex(1024);
    drop(peer);

    let outcome = timeout(
        Duration::from_secs(5),
        run(conn, stdin, stdout, options(Duration::from_secs(1))),
    )
    .await
    .unwrap();
    assert_eq!(outcome.exit_code(), 1);
}

#[tokio::test]
async fn test_local_read_error_is_fatal_without_close() {
    let (conn, mut peer) = memory::pair();
    let (stdout, _stdout_reader) = tokio::io::duplex(1024);

    let outcome = timeout(
        Duration::from_secs(5),
        run(conn, FailingReader, stdout, options(Duration::from_secs(1))),
    )
    .await
    .unwrap();
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(outcome.state, ShutdownState::Closed);
    assert_eq!(outcome.bridge.local_to_remote, DirectionState::Failed);
    assert!(matches!(outcome.error, Some(BridgeError::LocalRead(_))));

    // Cancellation, not a close handshake.
    drop(outcome);
    let (_, close) = timeout(Duration::from_secs(5), peer.collect_until_close())
        .await
        .unwrap();
    assert!(close.is_none());
}

#[tokio::test]
async fn test_local_write_error_is_fatal() {
    let (conn, peer) = memory::pair();
    let (_stdin_writer, stdin) = tokio::io::duplex(1024);

    peer.send_binary(&b"payload"[..]);

    let outcome = timeout(
        Duration::from_secs(5),
        run(conn, stdin, FailingWriter, options(Duration::from_secs(1))),
    )
    .await
    .unwrap();
    assert_eq!(outcome.exit_code(), 1);
    assert!(matches!(outcome.error, Some(BridgeError::LocalWrite(_))));
}

#[tokio::test]
async fn test_text_during_close_drain_is_fatal() {
    let (conn, mut peer) = memory::pair();
    let (stdin_writer, stdin) = tokio::io::duplex(1024);
    let (stdout, _stdout_reader) = tokio::io::duplex(1024);
    drop(stdin_writer);

    let bridge = tokio::spawn(run(conn, stdin, stdout, options(Duration::from_secs(5))));

    let (_, close) = timeout(Duration::from_secs(5), peer.collect_until_close())
        .await
        .unwrap();
    assert!(close.is_some());
    peer.send_text("late text");

    let outcome = timeout(Duration::from_secs(5), bridge)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.exit_code(), 1);
}

#[tokio::test]
async fn test_crashed_direction_is_fatal() {
    let (conn, _peer) = memory::pair();
    let (sink, _source) = conn.split();
    // Local input stays open, so only the crash can end the bridge.
    let (_stdin_writer, stdin) = tokio::io::duplex(1024);
    let (stdout, _stdout_reader) = tokio::io::duplex(1024);

    let outcome = timeout(
        Duration::from_secs(5),
        run(
            CrashingConnection { sink },
            stdin,
            stdout,
            options(Duration::from_secs(1)),
        ),
    )
    .await
    .expect("a crashed direction must end the bridge");

    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(outcome.bridge.remote_to_local, DirectionState::Failed);
    assert!(matches!(outcome.error, Some(BridgeError::TaskFailed(_))));
}
