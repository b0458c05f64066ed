//! Transport context and its builder.
//!
//! A [`TransportContext`] owns everything one side of the protocol needs:
//! the socket router, the connector registry, the pending call table and the
//! handshake table. It is cheap to clone; clones share the same state. Two
//! contexts in one process are fully independent, which is how the tests
//! run both peers side by side.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use node_connector::{HandlerTable, Reply, TransportContext};
//! use node_connector::transport::memory;
//! use node_connector::transport::SocketRole;
//! use serde_json::json;
//!
//! # async fn run() -> node_connector::Result<()> {
//! let host = TransportContext::builder()
//!     .call_timeout(Duration::from_secs(30))
//!     .build();
//! let worker = TransportContext::new();
//!
//! let ((host_sink, host_source), (worker_sink, worker_source)) = memory::pair();
//! host.attach_socket(SocketRole::Control, host_sink, host_source)?;
//! worker.serve_socket(worker_sink, worker_source);
//!
//! let handlers = HandlerTable::new().handle("ping", |_: serde_json::Value, _| async {
//!     Ok(Reply::new(json!("pong")))
//! });
//! let worker_side = worker.create_connector("demo", handlers)?;
//! let host_side = host.create_connector("demo", HandlerTable::new())?.await?;
//!
//! let reply = host_side.exec_peer("ping", json!(null), None)?.await?;
//! assert_eq!(reply.data, json!("pong"));
//! # drop(worker_side);
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;

use crate::connection::{spawn_connection, Connection};
use crate::connector::{Connector, ConnectorReady, ConnectorRegistry, HandlerTable};
use crate::dispatcher;
use crate::error::{ConnectorError, Result};
use crate::handshake::HandshakeTable;
use crate::pending::{PendingCalls, PendingReply};
use crate::protocol::{build_frame, Envelope, LARGE_DATA_THRESHOLD};
use crate::router::{OutboundFrame, SocketRouter, DEFAULT_MAX_SEND_QUEUE};
use crate::transport::{FrameSink, FrameSource, SocketRole};

/// Default payload size above which the large-data socket is preferred.
pub const DEFAULT_LARGE_DATA_THRESHOLD: usize = LARGE_DATA_THRESHOLD;

/// Park timeout used by [`TransportContextBuilder::park_unknown_connectors`]
/// callers that want the usual value.
pub const DEFAULT_PARK_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of frames parked per missing connector.
pub const DEFAULT_MAX_PARKED_PER_CONNECTOR: usize = 2000;

/// Configuration for a [`TransportContext`].
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Payloads strictly larger than this go to the large-data socket.
    pub large_data_threshold: usize,
    /// Frames held while no socket is bound.
    pub max_send_queue: usize,
    /// How long `exec_peer` waits for a response. `None` waits forever.
    pub call_timeout: Option<Duration>,
    /// Park inbound frames for connectors not created yet, for this long.
    /// `None` rejects them immediately with `NoSuchConnector`.
    pub park_unknown_connectors: Option<Duration>,
    /// Park queue bound per connector name.
    pub max_parked_per_connector: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            large_data_threshold: DEFAULT_LARGE_DATA_THRESHOLD,
            max_send_queue: DEFAULT_MAX_SEND_QUEUE,
            call_timeout: None,
            park_unknown_connectors: None,
            max_parked_per_connector: DEFAULT_MAX_PARKED_PER_CONNECTOR,
        }
    }
}

/// Builder for configuring and creating a [`TransportContext`].
#[derive(Debug, Clone, Default)]
pub struct TransportContextBuilder {
    config: ContextConfig,
}

impl TransportContextBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the large-data threshold in bytes.
    ///
    /// Default: 2 MiB
    pub fn large_data_threshold(mut self, bytes: usize) -> Self {
        self.config.large_data_threshold = bytes;
        self
    }

    /// Set the send queue capacity.
    ///
    /// Default: 10,000
    pub fn max_send_queue(mut self, capacity: usize) -> Self {
        self.config.max_send_queue = capacity;
        self
    }

    /// Fail calls that are not answered within `timeout`.
    ///
    /// Default: wait forever
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = Some(timeout);
        self
    }

    /// Park inbound `exec`/`event` frames for connectors that are not
    /// created yet, for up to `timeout`.
    pub fn park_unknown_connectors(mut self, timeout: Duration) -> Self {
        self.config.park_unknown_connectors = Some(timeout);
        self
    }

    /// Set how many frames may be parked per connector.
    ///
    /// Default: 2,000
    pub fn max_parked_per_connector(mut self, limit: usize) -> Self {
        self.config.max_parked_per_connector = limit;
        self
    }

    /// Build the context.
    pub fn build(self) -> TransportContext {
        TransportContext::with_config(self.config)
    }
}

struct ContextInner {
    config: ContextConfig,
    router: Mutex<SocketRouter>,
    registry: Mutex<ConnectorRegistry>,
    handshake: Mutex<HandshakeTable>,
    pending: Arc<PendingCalls>,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        self.pending.clear();
    }
}

/// One side of the protocol.
///
/// Connector handles, [`crate::transport::ws::serve`] and
/// [`crate::transport::ws::maintain_connection`] keep the context alive.
/// Attached sockets do not: once the last of those handles is dropped, calls
/// still waiting for a reply fail with [`ConnectorError::ConnectionClosed`]
/// and each read loop stops at its next message.
#[derive(Clone)]
pub struct TransportContext {
    inner: Arc<ContextInner>,
}

/// Non-owning handle held by socket read loops.
#[derive(Clone)]
pub(crate) struct WeakContext {
    inner: Weak<ContextInner>,
}

impl WeakContext {
    pub(crate) fn upgrade(&self) -> Option<TransportContext> {
        self.inner.upgrade().map(|inner| TransportContext { inner })
    }
}

impl TransportContext {
    /// Create a context with default configuration.
    pub fn new() -> Self {
        Self::with_config(ContextConfig::default())
    }

    /// Create a new context builder.
    pub fn builder() -> TransportContextBuilder {
        TransportContextBuilder::new()
    }

    /// Create a context with the given configuration.
    pub fn with_config(config: ContextConfig) -> Self {
        let router = SocketRouter::new(config.max_send_queue, config.large_data_threshold);
        Self {
            inner: Arc::new(ContextInner {
                config,
                router: Mutex::new(router),
                registry: Mutex::new(ConnectorRegistry::default()),
                handshake: Mutex::new(HandshakeTable::default()),
                pending: Arc::new(PendingCalls::new()),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakContext {
        WeakContext {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }

    /// Register a connector and announce it to the peer.
    ///
    /// Fails right away if the name is empty or taken, or if the
    /// announcement cannot be queued. The returned future resolves once the
    /// peer has created a connector of the same name; creation order on the
    /// two sides does not matter.
    pub fn create_connector(&self, name: &str, handlers: HandlerTable) -> Result<ConnectorReady> {
        if name.is_empty() {
            return Err(ConnectorError::InvalidPayloadArgument(
                "connector name must not be empty".to_string(),
            ));
        }

        let (entry, parked) = {
            let mut registry = self.inner.registry.lock();
            if registry.contains(name) {
                return Err(ConnectorError::DuplicateConnector(name.to_string()));
            }
            let announcement = Envelope::ConnectorCreated {
                command_id: Some(self.inner.pending.next_id()),
                connector: name.to_string(),
            };
            self.route(build_frame(&announcement, None)?, 0)?;
            registry.register(name, handlers)?
        };
        tracing::debug!("created connector {}", name);

        let ready = self.inner.handshake.lock().begin(name);
        dispatcher::replay(self, &entry, parked);

        Ok(ConnectorReady::new(Connector::new(entry, self.clone()), ready))
    }

    /// Handle to an already created connector.
    pub fn connector(&self, name: &str) -> Result<Connector> {
        let entry = self.inner.registry.lock().lookup(name)?;
        Ok(Connector::new(entry, self.clone()))
    }

    /// Check if the peer has announced a connector called `name`.
    pub fn is_peer_ready(&self, name: &str) -> bool {
        self.inner.handshake.lock().is_confirmed(name)
    }

    /// Run the protocol on a socket this side accepted.
    ///
    /// The socket gets a role once the peer announces one on it.
    pub fn serve_socket<S, R>(&self, sink: S, source: R) -> Connection
    where
        S: FrameSink,
        R: FrameSource,
    {
        spawn_connection(self.clone(), sink, source)
    }

    /// Run the protocol on a socket this side dialed.
    ///
    /// Sends the role announcement first, then binds the socket locally so
    /// queued frames follow the announcement.
    pub fn attach_socket<S, R>(&self, role: SocketRole, sink: S, source: R) -> Result<Connection>
    where
        S: FrameSink,
        R: FrameSource,
    {
        let announcement = build_frame(&role.announcement(), None)?;
        let connection = spawn_connection(self.clone(), sink, source);

        let writer = connection.writer().clone();
        writer.send(announcement)?;
        self.inner.router.lock().bind(writer, role);
        Ok(connection)
    }

    /// Check if at least one socket is bound.
    pub fn is_connected(&self) -> bool {
        self.inner.router.lock().is_connected()
    }

    /// Check if a socket currently holds `role`.
    pub fn has_socket(&self, role: SocketRole) -> bool {
        self.inner.router.lock().bound(role).is_some()
    }

    /// Frames waiting for a socket.
    pub fn queued_frames(&self) -> usize {
        self.inner.router.lock().queued()
    }

    /// Calls waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    pub(crate) fn send_exec(
        &self,
        connector: &str,
        function: &str,
        data: Value,
        payload: Option<Bytes>,
    ) -> Result<PendingReply> {
        if payload.is_some() && !(data.is_object() || data.is_null()) {
            return Err(ConnectorError::InvalidPayloadArgument(
                "data must be an object or null when sending a payload".to_string(),
            ));
        }

        let pending = &self.inner.pending;
        let id = pending.next_id();
        let envelope = Envelope::Exec {
            command_id: id,
            connector: connector.to_string(),
            function: function.to_string(),
            data,
        };
        let bytes = build_frame(&envelope, payload.as_ref())?;

        let rx = pending.register(id);
        if let Err(e) = self.route(bytes, payload.as_ref().map_or(0, Bytes::len)) {
            pending.remove(id);
            return Err(e);
        }
        Ok(pending.reply_future(id, rx, self.inner.config.call_timeout))
    }

    pub(crate) fn send_event(
        &self,
        connector: &str,
        event: &str,
        data: Value,
        payload: Option<Bytes>,
    ) -> Result<()> {
        let envelope = Envelope::Event {
            connector: connector.to_string(),
            event: event.to_string(),
            data,
        };
        let bytes = build_frame(&envelope, payload.as_ref())?;
        self.route(bytes, payload.as_ref().map_or(0, Bytes::len))
    }

    fn route(&self, bytes: Bytes, payload_len: usize) -> Result<()> {
        self.inner
            .router
            .lock()
            .route(OutboundFrame::new(bytes, payload_len))
    }

    pub(crate) fn router(&self) -> &Mutex<SocketRouter> {
        &self.inner.router
    }

    pub(crate) fn registry(&self) -> &Mutex<ConnectorRegistry> {
        &self.inner.registry
    }

    pub(crate) fn handshake(&self) -> &Mutex<HandshakeTable> {
        &self.inner.handshake
    }

    pub(crate) fn pending(&self) -> &PendingCalls {
        &self.inner.pending
    }
}

impl Default for TransportContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransportContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportContext")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
