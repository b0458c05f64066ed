//! Peer handshake: waiting for the same-named connector on the other side.
//!
//! ```text
//!              create_connector            nodeConnectorCreated
//! Unannounced ─────────────────► Sent ─────────────────────────► Confirmed
//!      │                                                             ▲
//!      └──────────────── nodeConnectorCreated ──────────────────────┘
//! ```
//!
//! The two sides may create their connectors in either order. A peer
//! announcement that arrives before the local creation is remembered, so the
//! later local creation resolves immediately.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{ConnectorError, Result};

enum PeerState {
    /// Local announcement sent; these waiters settle on confirmation.
    AnnouncementSent(Vec<oneshot::Sender<()>>),
    /// The peer announced the connector.
    PeerConfirmed,
}

/// Per-name handshake state.
#[derive(Default)]
pub(crate) struct HandshakeTable {
    peers: HashMap<String, PeerState>,
}

impl HandshakeTable {
    /// Record the local announcement of `name`.
    ///
    /// The returned future resolves once the peer has announced `name`, or
    /// right away if it already did.
    pub(crate) fn begin(&mut self, name: &str) -> PeerReady {
        match self.peers.get_mut(name) {
            Some(PeerState::PeerConfirmed) => PeerReady { rx: None },
            Some(PeerState::AnnouncementSent(waiters)) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                PeerReady { rx: Some(rx) }
            }
            None => {
                let (tx, rx) = oneshot::channel();
                self.peers
                    .insert(name.to_string(), PeerState::AnnouncementSent(vec![tx]));
                PeerReady { rx: Some(rx) }
            }
        }
    }

    /// Record the peer's announcement of `name` and wake local waiters.
    pub(crate) fn confirm(&mut self, name: &str) {
        let previous = self
            .peers
            .insert(name.to_string(), PeerState::PeerConfirmed);
        if let Some(PeerState::AnnouncementSent(waiters)) = previous {
            for waiter in waiters {
                let _ = waiter.send(());
            }
        }
    }

    /// Check if the peer has announced `name`.
    pub(crate) fn is_confirmed(&self, name: &str) -> bool {
        matches!(self.peers.get(name), Some(PeerState::PeerConfirmed))
    }
}

/// Future that settles when the peer has confirmed a connector.
///
/// Fails with [`ConnectorError::ConnectionClosed`] if the owning context is
/// dropped first.
#[derive(Debug)]
pub struct PeerReady {
    rx: Option<oneshot::Receiver<()>>,
}

impl PeerReady {
    /// Check if the peer confirmation has already arrived.
    pub fn is_ready(&mut self) -> bool {
        match &mut self.rx {
            None => true,
            Some(rx) => {
                if rx.try_recv().is_ok() {
                    self.rx = None;
                    true
                } else {
                    false
                }
            }
        }
    }
}

impl Future for PeerReady {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        match Pin::new(rx).poll(cx) {
            Poll::Ready(Ok(())) => {
                self.rx = None;
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(_)) => Poll::Ready(Err(ConnectorError::ConnectionClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}
