//! Connection - one framed byte stream, decoded into envelope events.
//!
//! A `Connection` wraps anything that is `AsyncRead + AsyncWrite`, so real
//! `TcpStream`s and in-memory doubles (`tokio::io::duplex`) behave the
//! same. Opening a connection spawns:
//!
//! - a read task that feeds a [`FrameBuffer`](crate::protocol::FrameBuffer)
//!   and emits one [`ConnectionEvent::Message`] per decoded envelope, in
//!   sender order
//! - a writer task (see `writer`) that drains the outbound queue
//!
//! All lifecycle observations arrive on a single typed event channel per
//! connection. The final event is always [`ConnectionEvent::Disconnected`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, SimbusError};
use crate::protocol::{encode_frame, Envelope, FrameBuffer};
use crate::writer::{spawn_writer_task, WriterHandle};

/// Capacity of the per-connection event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Read buffer size for the read task.
const READ_BUFFER_SIZE: usize = 64 * 1024;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier assigned when a connection is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a connection reported an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Socket-level failure (reset, broken pipe, ...).
    Io(String),
    /// A complete frame failed to decode; the stream is corrupt.
    CorruptStream(String),
}

/// Lifecycle and message events of one connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The underlying transport is up.
    Connected,
    /// One decoded inbound envelope.
    Message(Envelope),
    /// The connection failed; it is closed afterwards.
    Error(ConnectionErrorKind),
    /// The connection is gone. Always the final event.
    Disconnected,
}

/// One physical framed byte-stream connection.
///
/// Cheaply cloneable; all clones refer to the same socket, queue, and
/// statistics.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    writer: WriterHandle,
    open: Arc<AtomicBool>,
    events_tx: mpsc::Sender<ConnectionEvent>,
    read_task: Arc<JoinHandle<()>>,
    writer_task: Arc<JoinHandle<Result<()>>>,
}

impl Connection {
    /// Wrap a byte stream and start its read and writer tasks.
    ///
    /// Returns the connection and the receiving end of its event channel.
    /// A `Connected` event is already queued when this returns.
    pub fn open<S>(stream: S) -> (Connection, mpsc::Receiver<ConnectionEvent>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        let (read_half, write_half) = tokio::io::split(stream);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (writer, writer_task) = spawn_writer_task(write_half);
        let open = Arc::new(AtomicBool::new(true));

        // Queued before the read task can emit anything else.
        let _ = events_tx.try_send(ConnectionEvent::Connected);

        let read_task = tokio::spawn(read_loop(
            id,
            read_half,
            events_tx.clone(),
            open.clone(),
        ));

        let connection = Connection {
            id,
            writer,
            open,
            events_tx,
            read_task: Arc::new(read_task),
            writer_task: Arc::new(writer_task),
        };
        (connection, events_rx)
    }

    /// The identifier assigned at creation.
    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether the connection still accepts writes.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Cumulative bytes successfully written to the stream.
    #[inline]
    pub fn bytes_written(&self) -> u64 {
        self.writer.bytes_written()
    }

    /// Encode an envelope and queue it for writing.
    ///
    /// Returns once the frame is handed to the writer task; it never waits
    /// for the peer. Fails with [`SimbusError::ConnectionClosed`] after
    /// close or error.
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        if !self.is_open() {
            return Err(SimbusError::ConnectionClosed);
        }
        let frame = encode_frame(envelope)?;
        self.writer.send(Bytes::from(frame)).await
    }

    /// Encode an envelope and queue it without awaiting.
    ///
    /// For use inside synchronous subscriber callbacks (e.g. replying to a
    /// request). Fails if the outbound queue is full or the connection is
    /// closed.
    pub fn try_send(&self, envelope: &Envelope) -> Result<()> {
        if !self.is_open() {
            return Err(SimbusError::ConnectionClosed);
        }
        let frame = encode_frame(envelope)?;
        self.writer.try_send(Bytes::from(frame))
    }

    /// Close the connection.
    ///
    /// Immediate from the caller's perspective: received-but-undispatched
    /// bytes are discarded, queued outbound frames are dropped. Idempotent.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.read_task.abort();
            self.writer_task.abort();
            // The event channel may be backlogged with undrained messages.
            // `Disconnected` must still arrive as the final event, so a
            // full channel falls back to an async send instead of dropping
            // the terminal event.
            if let Err(mpsc::error::TrySendError::Full(event)) =
                self.events_tx.try_send(ConnectionEvent::Disconnected)
            {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let events = self.events_tx.clone();
                    handle.spawn(async move {
                        let _ = events.send(event).await;
                    });
                }
            }
        }
    }
}

/// Read bytes, reassemble frames, emit events.
async fn read_loop<R>(
    id: ConnectionId,
    mut reader: R,
    events: mpsc::Sender<ConnectionEvent>,
    open: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin,
{
    let mut frame_buffer = FrameBuffer::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        match reader.read(&mut buf).await {
            // Peer closed the stream.
            Ok(0) => {
                tracing::debug!(connection = %id, "peer disconnected");
                open.store(false, Ordering::Release);
                let _ = events.send(ConnectionEvent::Disconnected).await;
                return;
            }
            Ok(n) => match frame_buffer.push(&buf[..n]) {
                Ok(envelopes) => {
                    for envelope in envelopes {
                        if events
                            .send(ConnectionEvent::Message(envelope))
                            .await
                            .is_err()
                        {
                            // Receiver gone; nobody is listening anymore.
                            open.store(false, Ordering::Release);
                            return;
                        }
                    }
                }
                Err(e) => {
                    // Frame boundaries can't be trusted after a corrupt
                    // frame, so the connection goes down with it.
                    tracing::warn!(connection = %id, error = %e, "corrupt inbound stream");
                    open.store(false, Ordering::Release);
                    let _ = events
                        .send(ConnectionEvent::Error(ConnectionErrorKind::CorruptStream(
                            e.to_string(),
                        )))
                        .await;
                    let _ = events.send(ConnectionEvent::Disconnected).await;
                    return;
                }
            },
            Err(e) => {
                tracing::warn!(connection = %id, error = %e, "socket error");
                open.store(false, Ordering::Release);
                let _ = events
                    .send(ConnectionEvent::Error(ConnectionErrorKind::Io(
                        e.to_string(),
                    )))
                    .await;
                let _ = events.send(ConnectionEvent::Disconnected).await;
                return;
            }
        }
    }
}
