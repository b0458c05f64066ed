//! # node-connector
//!
//! Bidirectional RPC and event messaging between two processes, multiplexed
//! over one or two WebSockets.
//!
//! Each side creates a named *connector* with a table of handlers. Once both
//! sides have created the same name, either side can call the other's
//! handlers ([`Connector::exec_peer`]) or fire events at it
//! ([`Connector::trigger_peer`]). Every call and event may carry a binary
//! payload next to its JSON data.
//!
//! ## Architecture
//!
//! - **Frame codec** ([`protocol`]): `u32 LE length | JSON metadata | payload`
//! - **Socket router**: control socket for small frames, large-data socket
//!   for payloads above 2 MiB, send queue while no socket is attached
//! - **Dispatcher**: handles `exec`, `event`, `response`, the socket role
//!   announcements and connector announcements
//! - **Transports** ([`transport`]): in-process pair and WebSocket adapters
//!
//! ## Example
//!
//! ```no_run
//! use node_connector::transport::{ws, SocketRole};
//! use node_connector::{HandlerTable, Reply, TransportContext};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> node_connector::Result<()> {
//!     // worker side
//!     let worker = TransportContext::new();
//!     let path = ws::generate_endpoint_path();
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
//!     let url = format!("ws://{}{}", listener.local_addr()?, path);
//!     tokio::spawn(ws::serve(listener, path, worker.clone(), ws::WsConfig::default()));
//!
//!     let handlers = HandlerTable::new().handle("echo", |data: serde_json::Value, payload| async move {
//!         Ok(Reply::new(data).with_optional_payload(payload))
//!     });
//!     let _worker_side = worker.create_connector("echo", handlers)?;
//!
//!     // host side
//!     let host = TransportContext::new();
//!     let _control = ws::maintain_connection(host.clone(), url.clone(), SocketRole::Control, ws::WsConfig::default());
//!     let _bulk = ws::maintain_connection(host.clone(), url, SocketRole::LargeData, ws::WsConfig::default());
//!
//!     let echo = host.create_connector("echo", HandlerTable::new())?.await?;
//!     let reply = echo.exec_peer("echo", json!({"hello": "world"}), None)?.await?;
//!     assert_eq!(reply.data, json!({"hello": "world"}));
//!     Ok(())
//! }
//! ```

pub mod connector;
pub mod error;
pub mod protocol;
pub mod transport;

mod connection;
mod context;
mod dispatcher;
mod handshake;
mod pending;
mod router;
mod writer;

pub use connection::Connection;
pub use connector::{Connector, ConnectorReady, HandlerTable, PeerEvent, Reply, SubscriptionId};
pub use context::{
    ContextConfig, TransportContext, TransportContextBuilder, DEFAULT_LARGE_DATA_THRESHOLD,
    DEFAULT_MAX_PARKED_PER_CONNECTOR, DEFAULT_PARK_TIMEOUT,
};
pub use error::{ConnectorError, ErrorCode, RemoteError, Result};
pub use handshake::PeerReady;
pub use pending::{PendingReply, MAX_SAFE_CALL_ID};
pub use router::DEFAULT_MAX_SEND_QUEUE;
pub use writer::SocketId;
