//! Dedicated writer task for outbound frames.
//!
//! Each connection owns one writer task fed through an mpsc channel:
//!
//! ```text
//! send() ──► mpsc::Sender<Bytes> ──► writer task ──► socket
//! ```
//!
//! `send` returns once the frame is queued, so callers are never blocked on
//! the socket itself. The task also owns the cumulative bytes-written
//! counter, which only advances after a frame has been fully written.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, SimbusError};

/// Default capacity of the outbound frame queue.
pub(crate) const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Handle for queueing frames to the writer task.
///
/// Cheaply cloneable; all clones share one queue and one byte counter.
#[derive(Clone)]
pub(crate) struct WriterHandle {
    tx: mpsc::Sender<Bytes>,
    bytes_written: Arc<AtomicU64>,
}

impl WriterHandle {
    /// Queue a frame for writing.
    ///
    /// Fails with [`SimbusError::ConnectionClosed`] once the writer task has
    /// stopped (socket closed or write error).
    pub(crate) async fn send(&self, frame: Bytes) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| SimbusError::ConnectionClosed)
    }

    /// Queue a frame without waiting for queue capacity.
    ///
    /// Intended for synchronous subscriber callbacks that want to reply.
    pub(crate) fn try_send(&self, frame: Bytes) -> Result<()> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                SimbusError::Protocol("outbound queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => SimbusError::ConnectionClosed,
        })
    }

    /// Cumulative bytes successfully written to the stream.
    #[inline]
    pub(crate) fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Acquire)
    }
}

/// Spawn the writer task for one connection.
pub(crate) fn spawn_writer_task<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
    let bytes_written = Arc::new(AtomicU64::new(0));

    let handle = WriterHandle {
        tx,
        bytes_written: bytes_written.clone(),
    };
    let task = tokio::spawn(writer_loop(rx, writer, bytes_written));

    (handle, task)
}

/// Receive frames and write them out, flushing once per drained burst.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<Bytes>,
    mut writer: W,
    bytes_written: Arc<AtomicU64>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(frame) => frame,
            // All handles dropped: clean shutdown.
            None => return Ok(()),
        };

        write_frame(&mut writer, &first, &bytes_written).await?;

        // Drain whatever else is already queued before flushing.
        while let Ok(frame) = rx.try_recv() {
            write_frame(&mut writer, &frame, &bytes_written).await?;
        }

        writer.flush().await?;
    }
}

async fn write_frame<W>(writer: &mut W, frame: &Bytes, bytes_written: &AtomicU64) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    bytes_written.fetch_add(frame.len() as u64, Ordering::Release);
    Ok(())
}
