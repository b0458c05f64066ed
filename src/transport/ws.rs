//! WebSocket transport over `tokio-tungstenite`.
//!
//! The worker side listens on a random endpoint path and serves every socket
//! that connects to it. The host side dials the endpoint twice, once per
//! [`SocketRole`], and keeps both sockets alive with [`maintain_connection`].
//!
//! ```text
//! host                                      worker
//! maintain_connection(Control)   ──ws──►    serve ─► serve_socket
//! maintain_connection(LargeData) ──ws──►    serve ─► serve_socket
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{FrameSink, FrameSource, Inbound, SocketRole};
use crate::connection::Connection;
use crate::context::TransportContext;
use crate::error::{ConnectorError, Result};

/// Default WebSocket message cap (2 GiB).
#[cfg(target_pointer_width = "64")]
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 2 << 30;

/// Default WebSocket message cap (the whole address space on 32-bit targets).
#[cfg(not(target_pointer_width = "64"))]
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = usize::MAX;

/// Default cap on the reconnect delay.
pub const DEFAULT_MAX_RECONNECT_BACKOFF: Duration = Duration::from_millis(1000);

/// Prefix of generated endpoint paths.
pub const ENDPOINT_PATH_PREFIX: &str = "/NodeConnector";

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Largest message accepted from the peer.
    pub max_message_size: usize,
    /// Upper bound for the delay between reconnect attempts.
    pub max_reconnect_backoff: Duration,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_reconnect_backoff: DEFAULT_MAX_RECONNECT_BACKOFF,
        }
    }
}

impl WsConfig {
    fn protocol_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            max_message_size: Some(self.max_message_size),
            max_frame_size: Some(self.max_message_size),
            ..WebSocketConfig::default()
        }
    }
}

/// Write half of a WebSocket.
pub struct WsSink<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

/// Read half of a WebSocket.
pub struct WsSource<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

fn split<S>(ws: WebSocketStream<S>) -> (WsSink<S>, WsSource<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (sink, stream) = ws.split();
    (WsSink { sink }, WsSource { stream })
}

impl<S> FrameSink for WsSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn feed(&mut self, frame: Bytes) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.sink.feed(Message::Binary(frame.to_vec())).await?;
            Ok(())
        })
    }

    fn flush(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.sink.flush().await?;
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.sink.close().await?;
            Ok(())
        })
    }
}

impl<S> FrameSource for WsSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn recv(&mut self) -> BoxFuture<'_, Option<Result<Inbound>>> {
        Box::pin(async move {
            loop {
                match self.stream.next().await? {
                    Ok(Message::Binary(data)) => return Some(Ok(Inbound::Binary(Bytes::from(data)))),
                    Ok(Message::Text(text)) => return Some(Ok(Inbound::Text(text))),
                    Ok(Message::Close(_)) => return None,
                    // tungstenite answers pings itself
                    Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                    Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                        return None
                    }
                    Err(e) => return Some(Err(e.into())),
                }
            }
        })
    }
}

/// Generate a random endpoint path such as `/NodeConnector3f9a...`.
pub fn generate_endpoint_path() -> String {
    format!("{}{:x}", ENDPOINT_PATH_PREFIX, rand_u64())
}

/// Simple random u64 using system time, process ID and a counter.
fn rand_u64() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let pid = std::process::id() as u64;
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);

    (nanos ^ count.rotate_left(32)).wrapping_mul(0x517cc1b727220a95) ^ pid
}

/// Complete the server side of the WebSocket handshake.
///
/// Requests for any path other than `path` are refused with 404.
pub async fn accept<S>(stream: S, path: &str, config: &WsConfig) -> Result<(WsSink<S>, WsSource<S>)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let check_path = |request: &Request, response: Response| {
        if request.uri().path() == path {
            return Ok(response);
        }
        let mut refusal = ErrorResponse::new(Some(format!("no endpoint at {}", request.uri().path())));
        *refusal.status_mut() = StatusCode::NOT_FOUND;
        Err(refusal)
    };

    let ws = tokio_tungstenite::accept_hdr_async_with_config(
        stream,
        check_path,
        Some(config.protocol_config()),
    )
    .await?;
    Ok(split(ws))
}

/// Accept sockets on `listener` forever, serving each one with `ctx`.
///
/// Failed handshakes are logged and do not stop the loop.
pub async fn serve(
    listener: TcpListener,
    path: String,
    ctx: TransportContext,
    config: WsConfig,
) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let ctx = ctx.clone();
        let path = path.clone();
        let config = config.clone();
        tokio::spawn(async move {
            match accept(stream, &path, &config).await {
                Ok((sink, source)) => {
                    tracing::debug!("websocket from {} accepted", peer);
                    ctx.serve_socket(sink, source);
                }
                Err(e) => tracing::warn!("websocket handshake with {} failed: {}", peer, e),
            }
        });
    }
}

/// Client-side stream type.
pub type ClientStream = MaybeTlsStream<TcpStream>;

/// Dial `url` and complete the client side of the handshake.
pub async fn connect(
    url: &str,
    config: &WsConfig,
) -> Result<(WsSink<ClientStream>, WsSource<ClientStream>)> {
    let (ws, _response) =
        tokio_tungstenite::connect_async_with_config(url, Some(config.protocol_config()), true)
            .await?;
    Ok(split(ws))
}

/// Dial `url` and attach the socket to `ctx` under `role`.
pub async fn attach(
    ctx: &TransportContext,
    url: &str,
    role: SocketRole,
    config: &WsConfig,
) -> Result<Connection> {
    let (sink, source) = connect(url, config).await?;
    ctx.attach_socket(role, sink, source)
}

/// Delay before the next reconnect attempt: 1 ms, then doubling, capped.
fn next_backoff(previous: Duration, max: Duration) -> Duration {
    if previous.is_zero() {
        Duration::from_millis(1).min(max)
    } else {
        (previous * 2).min(max)
    }
}

/// Keeps one socket role connected, redialing whenever it drops.
#[derive(Debug)]
pub struct MaintainedConnection {
    connected: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl MaintainedConnection {
    /// Wait until the socket is connected.
    pub async fn connected(&mut self) -> Result<()> {
        self.connected
            .wait_for(|up| *up)
            .await
            .map(|_| ())
            .map_err(|_| ConnectorError::ConnectionClosed)
    }

    /// Check if the socket is currently connected.
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Stop reconnecting.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for MaintainedConnection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Dial `url` for `role` and keep redialing with exponential backoff.
///
/// The backoff resets after every successful connection. Frames sent while
/// the socket is down wait in the context's send queue.
pub fn maintain_connection(
    ctx: TransportContext,
    url: String,
    role: SocketRole,
    config: WsConfig,
) -> MaintainedConnection {
    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut backoff = Duration::ZERO;
        loop {
            match attach(&ctx, &url, role, &config).await {
                Ok(connection) => {
                    backoff = Duration::ZERO;
                    let _ = tx.send(true);
                    if let Err(e) = connection.closed().await {
                        tracing::warn!("{} socket lost: {}", role, e);
                    }
                    let _ = tx.send(false);
                }
                Err(e) => tracing::debug!("{} socket connect to {} failed: {}", role, url, e),
            }
            backoff = next_backoff(backoff, config.max_reconnect_backoff);
            tokio::time::sleep(backoff).await;
        }
    });
    MaintainedConnection {
        connected: rx,
        task,
    }
}
