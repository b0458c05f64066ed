//! Echo - request/response over a localhost WebSocket.
//!
//! This example demonstrates:
//! - Serving a worker context on a random endpoint path
//! - Registering typed handlers on a connector
//! - Dialing both socket roles from the host with automatic reconnects
//! - Calling the peer with and without a binary payload
//!
//! ```sh
//! RUST_LOG=node_connector=debug cargo run --example echo
//! ```

use bytes::Bytes;
use node_connector::transport::{ws, SocketRole};
use node_connector::{HandlerTable, RemoteError, Reply, TransportContext};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Input structure for the greet function.
#[derive(Deserialize, Debug)]
struct GreetInput {
    name: String,
}

/// Output structure for the greet function.
#[derive(Serialize, Deserialize, Debug)]
struct GreetOutput {
    greeting: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Worker side: accept sockets on a private path
    let worker = TransportContext::new();
    let path = ws::generate_endpoint_path();
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("ws://{}{}", listener.local_addr()?, path);
    tokio::spawn(ws::serve(listener, path, worker.clone(), ws::WsConfig::default()));

    let handlers = HandlerTable::new()
        .handle("greet", |input: GreetInput, _payload| async move {
            Reply::serialize(&GreetOutput {
                greeting: format!("hello, {}", input.name),
            })
            .map_err(RemoteError::from)
        })
        .handle("reverse", |data: serde_json::Value, payload: Option<Bytes>| async move {
            let reversed = payload.map(|bytes| {
                let mut raw = bytes.to_vec();
                raw.reverse();
                Bytes::from(raw)
            });
            Ok(Reply::new(data).with_optional_payload(reversed))
        });
    worker.create_connector("echo", handlers)?;

    // Host side: dial both roles and keep them up
    let host = TransportContext::new();
    let config = ws::WsConfig::default();
    let _control = ws::maintain_connection(host.clone(), url.clone(), SocketRole::Control, config.clone());
    let _bulk = ws::maintain_connection(host.clone(), url.clone(), SocketRole::LargeData, config);
    tracing::info!("worker listening on {}", url);

    let echo = host.create_connector("echo", HandlerTable::new())?.await?;

    let reply = echo.exec_peer("greet", json!({"name": "world"}), None)?.await?;
    let greeting: GreetOutput = reply.decode()?;
    println!("greet -> {}", greeting.greeting);

    let reply = echo
        .exec_peer("reverse", json!({}), Some(Bytes::from_static(b"stressed")))?
        .await?;
    let reversed = reply.payload.unwrap_or_default();
    println!("reverse -> {}", String::from_utf8_lossy(&reversed));

    match echo.exec_peer("missing", json!(null), None)?.await {
        Ok(_) => println!("missing -> unexpectedly answered"),
        Err(e) => println!("missing -> {}", e),
    }

    Ok(())
}
