//! Connector module - named two-sided RPC/event channels.
//!
//! Provides:
//! - [`HandlerTable`] - function name to handler map served to the peer
//! - [`Connector`] - handle for calling the peer and listening to its events
//! - [`ConnectorReady`] - resolves once the peer created the same connector
//!
//! # Example
//!
//! ```no_run
//! use node_connector::connector::{HandlerTable, Reply};
//! use node_connector::TransportContext;
//! use serde_json::json;
//!
//! # async fn run(ctx: TransportContext) -> node_connector::Result<()> {
//! let handlers = HandlerTable::new().handle("hello", |name: String, _| async move {
//!     Ok(Reply::new(json!(format!("hello {}", name))))
//! });
//!
//! let connector = ctx.create_connector("greeter", handlers)?.await?;
//! let reply = connector.exec_peer("hello", json!("host"), None)?.await?;
//! println!("{}", reply.data);
//! # Ok(())
//! # }
//! ```

mod events;
mod handler;
mod registry;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use serde_json::Value;

pub use events::{EventCallback, PeerEvent, SubscriptionId};
pub use handler::{BoxFuture, Handler, HandlerResult, HandlerTable, Reply, TypedHandler};

pub(crate) use handler::invoke;
pub(crate) use registry::{ConnectorEntry, ConnectorRegistry, ParkOutcome, ParkedFrame};

use crate::context::TransportContext;
use crate::error::Result;
use crate::handshake::PeerReady;
use crate::pending::PendingReply;

/// Handle to a registered connector.
///
/// Cheap to clone; all clones talk to the same connector.
#[derive(Clone)]
pub struct Connector {
    entry: Arc<ConnectorEntry>,
    ctx: TransportContext,
}

impl Connector {
    pub(crate) fn new(entry: Arc<ConnectorEntry>, ctx: TransportContext) -> Self {
        Self { entry, ctx }
    }

    /// Connector name.
    pub fn name(&self) -> &str {
        self.entry.name()
    }

    /// Call `function` on the peer's connector of the same name.
    ///
    /// Returns a future for the peer's reply. Routing errors (for example
    /// [`QueueOverflow`](crate::ConnectorError::QueueOverflow)) are returned
    /// right away.
    ///
    /// # Errors
    ///
    /// [`InvalidPayloadArgument`](crate::ConnectorError::InvalidPayloadArgument)
    /// if a payload is attached to `data` that is neither an object nor `null`.
    pub fn exec_peer(
        &self,
        function: &str,
        data: Value,
        payload: Option<Bytes>,
    ) -> Result<PendingReply> {
        self.ctx.send_exec(self.name(), function, data, payload)
    }

    /// Trigger `event` on the peer's connector. Fire and forget.
    pub fn trigger_peer(&self, event: &str, data: Value, payload: Option<Bytes>) -> Result<()> {
        self.ctx.send_event(self.name(), event, data, payload)
    }

    /// Subscribe to `event` triggered by the peer.
    pub fn on<F>(&self, event: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&PeerEvent) + Send + Sync + 'static,
    {
        self.entry.subscribe(event, Arc::new(callback))
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.entry.unsubscribe(id)
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("name", &self.name())
            .finish()
    }
}

/// Future returned by [`TransportContext::create_connector`].
///
/// Resolves to the [`Connector`] once the peer has announced a connector of
/// the same name. Use [`ConnectorReady::connector`] to get the handle without
/// waiting; calls made before the peer is ready are parked on the peer side
/// if it has parking enabled.
#[derive(Debug)]
pub struct ConnectorReady {
    connector: Connector,
    ready: PeerReady,
}

impl ConnectorReady {
    pub(crate) fn new(connector: Connector, ready: PeerReady) -> Self {
        Self { connector, ready }
    }

    /// The connector handle, usable before the peer confirms.
    pub fn connector(&self) -> Connector {
        self.connector.clone()
    }

    /// Check if the peer has already confirmed.
    pub fn is_peer_ready(&mut self) -> bool {
        self.ready.is_ready()
    }
}

impl Future for ConnectorReady {
    type Output = Result<Connector>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.ready).poll(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(self.connector.clone())),
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}
