//! Events - fire-and-forget notifications in both directions.
//!
//! The host asks the worker to start a job; the worker reports progress
//! through `progress` events and the host stops listening once the job is
//! done.
//!
//! ```sh
//! cargo run --example events
//! ```

use std::time::Duration;

use node_connector::transport::{ws, SocketRole};
use node_connector::{HandlerTable, Reply, TransportContext};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Input structure for the start_work function.
#[derive(Deserialize, Debug)]
struct WorkInput {
    steps: u32,
}

/// Progress event structure.
#[derive(Serialize, Deserialize, Debug)]
struct Progress {
    percent: u32,
    message: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let worker = TransportContext::new();
    let path = ws::generate_endpoint_path();
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("ws://{}{}", listener.local_addr()?, path);
    tokio::spawn(ws::serve(listener, path, worker.clone(), ws::WsConfig::default()));

    // start_work acknowledges right away and reports progress from a task
    let (jobs_tx, mut jobs_rx) = mpsc::unbounded_channel::<u32>();
    let handlers = HandlerTable::new().handle("start_work", move |input: WorkInput, _payload| {
        let jobs_tx = jobs_tx.clone();
        async move {
            let _ = jobs_tx.send(input.steps);
            Ok(Reply::new(json!({"accepted": input.steps})))
        }
    });
    let jobs = worker.create_connector("jobs", handlers)?.connector();
    tokio::spawn(async move {
        while let Some(steps) = jobs_rx.recv().await {
            for step in 1..=steps {
                tokio::time::sleep(Duration::from_millis(50)).await;
                let progress = Progress {
                    percent: step * 100 / steps,
                    message: format!("step {}/{}", step, steps),
                };
                let data = match serde_json::to_value(&progress) {
                    Ok(data) => data,
                    Err(e) => {
                        tracing::error!("failed to encode progress: {}", e);
                        continue;
                    }
                };
                if let Err(e) = jobs.trigger_peer("progress", data, None) {
                    tracing::warn!("failed to report progress: {}", e);
                }
            }
        }
    });

    let host = TransportContext::new();
    let _control = ws::maintain_connection(host.clone(), url, SocketRole::Control, ws::WsConfig::default());
    let jobs = host.create_connector("jobs", HandlerTable::new())?.await?;

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let subscription = jobs.on("progress", move |event| match event.decode::<Progress>() {
        Ok(progress) => {
            println!("progress: {}% ({})", progress.percent, progress.message);
            if progress.percent >= 100 {
                let _ = done_tx.send(());
            }
        }
        Err(e) => tracing::warn!("bad progress event: {}", e),
    });

    let ack = jobs.exec_peer("start_work", json!({"steps": 5}), None)?.await?;
    println!("worker acknowledged: {}", ack.data);

    done_rx.recv().await;
    jobs.off(subscription);
    Ok(())
}
