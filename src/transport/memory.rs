//! In-process transport.
//!
//! [`pair`] returns two connected ends; whatever one end feeds, the other
//! end receives. Closing (or dropping) a sink ends the opposite source.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use node_connector::transport::memory;
//! use node_connector::transport::{FrameSink, FrameSource, Inbound};
//!
//! # tokio_test_block_on(async {
//! let ((mut a_sink, _a_source), (_b_sink, mut b_source)) = memory::pair();
//! a_sink.feed(Bytes::from_static(b"ping")).await.unwrap();
//! let got = b_source.recv().await.unwrap().unwrap();
//! assert_eq!(got, Inbound::Binary(Bytes::from_static(b"ping")));
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use super::{FrameSink, FrameSource, Inbound};
use crate::error::{ConnectorError, Result};

/// Write half of an in-process socket.
#[derive(Debug)]
pub struct MemorySink {
    tx: Option<mpsc::UnboundedSender<Inbound>>,
}

/// Read half of an in-process socket.
#[derive(Debug)]
pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

/// One end of an in-process socket.
pub type MemoryEnd = (MemorySink, MemorySource);

/// Create two connected socket ends.
pub fn pair() -> (MemoryEnd, MemoryEnd) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();

    (
        (MemorySink { tx: Some(a_tx) }, MemorySource { rx: b_rx }),
        (MemorySink { tx: Some(b_tx) }, MemorySource { rx: a_rx }),
    )
}

impl MemorySink {
    /// Push any message, including text, to the other end.
    pub fn send(&self, message: Inbound) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(ConnectorError::ConnectionClosed)?;
        tx.send(message).map_err(|_| ConnectorError::ConnectionClosed)
    }

    /// Check if the sink was closed or the other end dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, mpsc::UnboundedSender::is_closed)
    }
}

impl FrameSink for MemorySink {
    fn feed(&mut self, frame: Bytes) -> BoxFuture<'_, Result<()>> {
        let result = self.send(Inbound::Binary(frame));
        Box::pin(async move { result })
    }

    fn flush(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        self.tx = None;
        Box::pin(async { Ok(()) })
    }
}

impl FrameSource for MemorySource {
    fn recv(&mut self) -> BoxFuture<'_, Option<Result<Inbound>>> {
        Box::pin(async move { self.rx.recv().await.map(Ok) })
    }
}
