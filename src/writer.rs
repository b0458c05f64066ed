//! Dedicated writer task per physical socket.
//!
//! Routing decisions are synchronous (a full send queue must fail the call
//! that overflowed it), so the router never awaits a socket. Instead every
//! socket gets a writer task that receives encoded frames via an unbounded
//! mpsc channel and pushes them into the [`FrameSink`].
//!
//! # Architecture
//!
//! ```text
//! exec_peer ─┐
//! responses ─┼─► WriterHandle (mpsc) ─► Writer Task ─► FrameSink
//! events    ─┘
//! ```
//!
//! The writer feeds every frame that is already waiting and flushes once per
//! batch.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{ConnectorError, Result};
use crate::transport::FrameSink;

/// Maximum frames to feed before a flush.
const MAX_BATCH_SIZE: usize = 64;

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one physical socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(u64);

impl SocketId {
    fn next() -> Self {
        Self(NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value, for logs.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "socket#{}", self.0)
    }
}

/// Handle for sending frames to one socket's writer task.
///
/// This is cheaply cloneable; the router keeps clones for its role slots.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    id: SocketId,
    /// Channel sender for encoded frames.
    tx: mpsc::UnboundedSender<Bytes>,
    /// Frames handed over but not yet flushed.
    pending: Arc<AtomicUsize>,
}

impl WriterHandle {
    /// Socket identity.
    #[inline]
    pub fn id(&self) -> SocketId {
        self.id
    }

    /// Hand a frame to the writer task.
    ///
    /// Returns [`ConnectionClosed`](ConnectorError::ConnectionClosed) if the
    /// writer task has exited.
    pub fn send(&self, frame: Bytes) -> Result<()> {
        // Increment pending count BEFORE sending
        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(frame).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            ConnectorError::ConnectionClosed
        })
    }

    /// Check if the writer task has exited.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Get current pending frame count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task ends when every [`WriterHandle`] is dropped (clean close of the
/// sink) or when the sink fails.
pub fn spawn_writer_task<S>(sink: S) -> (WriterHandle, JoinHandle<Result<()>>)
where
    S: FrameSink,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle {
        id: SocketId::next(),
        tx,
        pending: pending.clone(),
    };

    let task = tokio::spawn(writer_loop(rx, sink, pending));

    (handle, task)
}

/// Main writer loop - receives frames and writes them to the sink.
async fn writer_loop<S>(
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    mut sink: S,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    S: FrameSink,
{
    loop {
        // Wait for first frame
        let first = match rx.recv().await {
            Some(f) => f,
            None => {
                // All handles dropped, clean shutdown
                let _ = sink.close().await;
                return Ok(());
            }
        };

        let mut batch_size = 1;
        let result = feed_batch(&mut sink, &mut rx, first, &mut batch_size).await;
        pending.fetch_sub(batch_size, Ordering::Release);

        if let Err(e) = result {
            // Stop accepting frames so routers see the socket as closed
            rx.close();
            return Err(e);
        }
    }
}

async fn feed_batch<S>(
    sink: &mut S,
    rx: &mut mpsc::UnboundedReceiver<Bytes>,
    first: Bytes,
    batch_size: &mut usize,
) -> Result<()>
where
    S: FrameSink,
{
    sink.feed(first).await?;

    // Collect additional ready frames (non-blocking)
    while *batch_size < MAX_BATCH_SIZE {
        match rx.try_recv() {
            Ok(frame) => {
                *batch_size += 1;
                sink.feed(frame).await?;
            }
            Err(_) => break,
        }
    }

    sink.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory;
    use crate::transport::{FrameSource, Inbound};
    use futures_util::future::BoxFuture;

    #[tokio::test]
    async fn test_writer_handle_send() {
        let ((sink, _a_source), (_b_sink, mut source)) = memory::pair();
        let (handle, _task) = spawn_writer_task(sink);

        handle.send(Bytes::from_static(b"hello")).unwrap();

        let got = source.recv().await.unwrap().unwrap();
        assert_eq!(got, Inbound::Binary(Bytes::from_static(b"hello")));
    }

    #[tokio::test]
    async fn test_writer_preserves_order() {
        let ((sink, _a_source), (_b_sink, mut source)) = memory::pair();
        let (handle, _task) = spawn_writer_task(sink);

        for i in 0..200u32 {
            handle.send(Bytes::copy_from_slice(&i.to_le_bytes())).unwrap();
        }

        for i in 0..200u32 {
            let got = source.recv().await.unwrap().unwrap();
            assert_eq!(got, Inbound::Binary(Bytes::copy_from_slice(&i.to_le_bytes())));
        }
    }

    #[tokio::test]
    async fn test_socket_ids_unique() {
        let ((a, _), (b, _)) = memory::pair();
        let (h1, _t1) = spawn_writer_task(a);
        let (h2, _t2) = spawn_writer_task(b);

        assert_ne!(h1.id(), h2.id());
        assert_eq!(h1.clone().id(), h1.id());
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_handle_drop() {
        let ((sink, _a_source), (_b_sink, mut source)) = memory::pair();
        let (handle, task) = spawn_writer_task(sink);

        // Drop the handle to close the channel
        drop(handle);

        let result = task.await.unwrap();
        assert!(result.is_ok());
        // Sink was closed, so the other end sees end-of-stream
        assert!(source.recv().await.is_none());
    }

    struct FailingSink;

    impl FrameSink for FailingSink {
        fn feed(&mut self, _frame: Bytes) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Err(ConnectorError::ConnectionClosed) })
        }

        fn flush(&mut self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn close(&mut self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn test_sink_failure_closes_handle() {
        let (handle, task) = spawn_writer_task(FailingSink);

        handle.send(Bytes::from_static(b"x")).unwrap();

        assert!(task.await.unwrap().is_err());
        assert!(handle.is_closed());
        assert!(matches!(
            handle.send(Bytes::new()),
            Err(ConnectorError::ConnectionClosed)
        ));
        assert_eq!(handle.pending_count(), 0);
    }
}
