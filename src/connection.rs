//! Per-socket driver: one writer task plus one read loop.
//!
//! ```text
//! FrameSource ─► read loop ─► dispatcher        (frames handled in arrival order)
//! router/handlers ─► WriterHandle ─► writer task ─► FrameSink
//! ```
//!
//! When the read loop ends (peer closed, transport error, or
//! [`Connection::close`]) the socket is removed from whichever role it held.
//! The read loop only holds a weak handle to its context, so it also ends
//! once the context itself has been dropped.

use tokio::task::JoinHandle;

use crate::context::{TransportContext, WeakContext};
use crate::dispatcher::dispatch;
use crate::error::{ConnectorError, Result};
use crate::transport::{FrameSink, FrameSource};
use crate::writer::{spawn_writer_task, SocketId, WriterHandle};

/// A running physical socket.
#[derive(Debug)]
pub struct Connection {
    writer: WriterHandle,
    reader: JoinHandle<Result<()>>,
}

impl Connection {
    /// Socket identity, as used in log lines.
    pub fn id(&self) -> SocketId {
        self.writer.id()
    }

    pub(crate) fn writer(&self) -> &WriterHandle {
        &self.writer
    }

    /// Check if the read loop or the writer has ended.
    pub fn is_closed(&self) -> bool {
        self.reader.is_finished() || self.writer.is_closed()
    }

    /// Frames handed to the writer but not yet flushed.
    pub fn pending_frames(&self) -> usize {
        self.writer.pending_count()
    }

    /// Wait until the peer closes the socket or the transport fails.
    pub async fn closed(self) -> Result<()> {
        let Connection { writer, reader } = self;
        drop(writer);
        match reader.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(_) => Err(ConnectorError::ConnectionClosed),
        }
    }

    /// Stop reading. The writer drains and closes the socket once the last
    /// handle to it is gone.
    pub fn close(&self) {
        self.reader.abort();
    }
}

/// Unbinds the socket from the router when the read loop goes away, even
/// when it is aborted.
struct UnbindOnDrop {
    ctx: WeakContext,
    socket: SocketId,
}

impl Drop for UnbindOnDrop {
    fn drop(&mut self) {
        let Some(ctx) = self.ctx.upgrade() else {
            return;
        };
        if ctx.router().lock().unbind(self.socket).is_none() {
            tracing::debug!("{} closed", self.socket);
        }
    }
}

pub(crate) fn spawn_connection<S, R>(ctx: TransportContext, sink: S, source: R) -> Connection
where
    S: FrameSink,
    R: FrameSource,
{
    let (writer, writer_task) = spawn_writer_task(sink);
    let socket = writer.id();

    tokio::spawn(async move {
        if let Ok(Err(e)) = writer_task.await {
            tracing::warn!("{} write failed: {}", socket, e);
        }
    });

    let reader = tokio::spawn(read_loop(ctx.downgrade(), writer.clone(), source));
    Connection { writer, reader }
}

/// Main read loop - receives messages and hands them to the dispatcher.
async fn read_loop<R: FrameSource>(
    ctx: WeakContext,
    origin: WriterHandle,
    mut source: R,
) -> Result<()> {
    let _unbind = UnbindOnDrop {
        ctx: ctx.clone(),
        socket: origin.id(),
    };

    loop {
        match source.recv().await {
            Some(Ok(message)) => {
                let Some(ctx) = ctx.upgrade() else {
                    tracing::debug!("{} context dropped, stop reading", origin.id());
                    return Ok(());
                };
                dispatch(&ctx, &origin, message);
            }
            Some(Err(e)) => {
                tracing::error!("{} read error: {}", origin.id(), e);
                return Err(e);
            }
            // Connection closed
            None => return Ok(()),
        }
    }
}
