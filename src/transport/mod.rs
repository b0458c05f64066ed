//! Transport module - message-oriented duplex channels.
//!
//! The protocol only needs three things from a physical socket: push a
//! binary message, receive the next message, and notice the end of the
//! stream. [`FrameSink`] and [`FrameSource`] capture exactly that.
//!
//! Provides:
//! - [`memory`] - in-process pair (tests, single-process simulations)
//! - [`ws`] - WebSocket adapters over `tokio-tungstenite`

pub mod memory;
pub mod ws;

use bytes::Bytes;
use futures_util::future::BoxFuture;

use crate::error::Result;
use crate::protocol::Envelope;

/// A message received from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Binary message (the only kind the protocol accepts).
    Binary(Bytes),
    /// Text message (rejected by the frame decoder).
    Text(String),
}

/// Write half of a physical socket.
///
/// `feed` queues one message; `flush` pushes everything fed so far. The
/// writer task feeds a batch and flushes once.
pub trait FrameSink: Send + 'static {
    /// Queue one binary message.
    fn feed(&mut self, frame: Bytes) -> BoxFuture<'_, Result<()>>;

    /// Flush queued messages to the peer.
    fn flush(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Close the socket.
    fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Read half of a physical socket.
pub trait FrameSource: Send + 'static {
    /// Receive the next message, `None` once the socket is closed.
    fn recv(&mut self) -> BoxFuture<'_, Option<Result<Inbound>>>;
}

/// Role a physical socket plays for outbound routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketRole {
    /// Low-latency small messages.
    Control,
    /// Payloads above the large-data threshold.
    LargeData,
}

impl SocketRole {
    /// Handshake frame the dialing side sends first on a socket of this role.
    pub fn announcement(self) -> Envelope {
        match self {
            SocketRole::Control => Envelope::ControlSocket,
            SocketRole::LargeData => Envelope::LargeDataSocket,
        }
    }

    /// Short name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            SocketRole::Control => "control",
            SocketRole::LargeData => "large data",
        }
    }
}

impl std::fmt::Display for SocketRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
