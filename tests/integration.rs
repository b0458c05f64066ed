//! Integration tests for node-connector.
//!
//! Two contexts talk to each other over in-process sockets (and once over a
//! real localhost WebSocket), exercising calls, events, the connector
//! handshake, routing between the two socket roles and parking.

use std::time::Duration;

use bytes::Bytes;
use node_connector::protocol::{build_frame, Envelope, Frame};
use node_connector::transport::memory::{self, MemorySink, MemorySource};
use node_connector::transport::{ws, FrameSource, Inbound, SocketRole};
use node_connector::{
    Connection, ConnectorError, ErrorCode, HandlerTable, Reply, TransportContext,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

/// Dial from `host` to `worker` over an in-process socket with `role`.
fn link(host: &TransportContext, worker: &TransportContext, role: SocketRole) -> (Connection, Connection) {
    let ((host_sink, host_source), (worker_sink, worker_source)) = memory::pair();
    let dialed = host.attach_socket(role, host_sink, host_source).unwrap();
    let served = worker.serve_socket(worker_sink, worker_source);
    (dialed, served)
}

/// Attach `ctx` to a raw peer end that the test drives by hand.
fn raw_peer(ctx: &TransportContext, role: SocketRole) -> (Connection, MemorySink, MemorySource) {
    let ((local_sink, local_source), (peer_sink, peer_source)) = memory::pair();
    let connection = ctx.attach_socket(role, local_sink, local_source).unwrap();
    (connection, peer_sink, peer_source)
}

async fn next_frame(source: &mut MemorySource) -> (Envelope, Option<Bytes>) {
    let message = tokio::time::timeout(WAIT, source.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("socket closed")
        .unwrap();
    Frame::from_inbound(message).unwrap().into_parts().unwrap()
}

fn echo_handlers() -> HandlerTable {
    HandlerTable::new().handle("echo", |data: Value, payload| async move {
        Ok(Reply::new(data).with_optional_payload(payload))
    })
}

fn remote_code(err: &ConnectorError) -> ErrorCode {
    err.remote_code().cloned().expect("expected a remote error")
}

#[tokio::test]
async fn test_exec_echo_with_payload() {
    let host = TransportContext::new();
    let worker = TransportContext::new();
    let _sockets = link(&host, &worker, SocketRole::Control);

    let _worker_side = worker.create_connector("echo", echo_handlers()).unwrap();
    let echo = tokio::time::timeout(WAIT, host.create_connector("echo", HandlerTable::new()).unwrap())
        .await
        .unwrap()
        .unwrap();

    let payload = Bytes::from_static(b"\x00\x01binary\xff");
    let reply = echo
        .exec_peer("echo", json!({"msg": "hi"}), Some(payload.clone()))
        .unwrap()
        .await
        .unwrap();

    assert_eq!(reply.data, json!({"msg": "hi"}));
    assert_eq!(reply.payload, Some(payload));
    assert_eq!(host.pending_calls(), 0);
}

#[tokio::test]
async fn test_typed_reply_decodes() {
    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct Sum {
        total: i64,
    }

    let host = TransportContext::new();
    let worker = TransportContext::new();
    let _sockets = link(&host, &worker, SocketRole::Control);

    let handlers = HandlerTable::new().handle("add", |nums: Vec<i64>, _payload| async move {
        Ok(Reply::new(json!({"total": nums.iter().sum::<i64>()})))
    });
    worker.create_connector("math", handlers).unwrap();
    let math = host.create_connector("math", HandlerTable::new()).unwrap().await.unwrap();

    let reply = math.exec_peer("add", json!([1, 2, 3]), None).unwrap().await.unwrap();
    assert_eq!(reply.decode::<Sum>().unwrap(), Sum { total: 6 });

    let err = math
        .exec_peer("add", json!("not a list"), None)
        .unwrap()
        .await
        .unwrap_err();
    assert_eq!(remote_code(&err), ErrorCode::InvalidPayloadArgument);
}

#[tokio::test]
async fn test_missing_function_is_rejected_by_peer() {
    let host = TransportContext::new();
    let worker = TransportContext::new();
    let _sockets = link(&host, &worker, SocketRole::Control);

    worker.create_connector("echo", echo_handlers()).unwrap();
    let echo = host.create_connector("echo", HandlerTable::new()).unwrap().await.unwrap();

    let err = echo.exec_peer("nope", Value::Null, None).unwrap().await.unwrap_err();
    assert_eq!(remote_code(&err), ErrorCode::NoSuchFn);
    assert!(err.to_string().contains("nope"));
}

#[tokio::test]
async fn test_missing_connector_is_rejected_by_peer() {
    let host = TransportContext::new();
    let worker = TransportContext::new();
    let _sockets = link(&host, &worker, SocketRole::Control);

    let lonely = host.create_connector("lonely", HandlerTable::new()).unwrap().connector();
    let err = lonely.exec_peer("anything", json!({}), None).unwrap().await.unwrap_err();
    assert_eq!(remote_code(&err), ErrorCode::NoSuchConnector);
}

#[tokio::test]
async fn test_handler_error_keeps_code_and_message() {
    let host = TransportContext::new();
    let worker = TransportContext::new();
    let _sockets = link(&host, &worker, SocketRole::Control);

    let handlers = HandlerTable::new().handle("fail", |_: Value, _payload| async move {
        Err(node_connector::RemoteError::new("disk full")
            .with_code(ErrorCode::Application("ENOSPC".to_string())))
    });
    worker.create_connector("fs", handlers).unwrap();
    let fs = host.create_connector("fs", HandlerTable::new()).unwrap().await.unwrap();

    let err = fs.exec_peer("fail", Value::Null, None).unwrap().await.unwrap_err();
    match err {
        ConnectorError::Remote(remote) => {
            assert_eq!(remote.message, "disk full");
            assert_eq!(remote.code, ErrorCode::Application("ENOSPC".to_string()));
        }
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_responses_correlate_out_of_order() {
    let host = TransportContext::new();
    let worker = TransportContext::new();
    let _sockets = link(&host, &worker, SocketRole::Control);

    let handlers = HandlerTable::new().handle("sleep", |ms: u64, _payload| async move {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(Reply::new(json!(ms)))
    });
    worker.create_connector("timer", handlers).unwrap();
    let timer = host.create_connector("timer", HandlerTable::new()).unwrap().await.unwrap();

    let slow = timer.exec_peer("sleep", json!(60), None).unwrap();
    let fast = timer.exec_peer("sleep", json!(5), None).unwrap();
    let mid = timer.exec_peer("sleep", json!(30), None).unwrap();
    assert_ne!(slow.id(), fast.id());

    let (slow, fast, mid) = tokio::join!(slow, fast, mid);
    assert_eq!(slow.unwrap().data, json!(60));
    assert_eq!(fast.unwrap().data, json!(5));
    assert_eq!(mid.unwrap().data, json!(30));
}

#[tokio::test]
async fn test_both_sides_can_call() {
    let host = TransportContext::new();
    let worker = TransportContext::new();
    let _sockets = link(&host, &worker, SocketRole::Control);

    let host_handlers = HandlerTable::new().handle("whoami", |_: Value, _payload| async move {
        Ok(Reply::new(json!("host")))
    });
    let worker_handlers = HandlerTable::new().handle("whoami", |_: Value, _payload| async move {
        Ok(Reply::new(json!("worker")))
    });
    let host_ready = host.create_connector("id", host_handlers).unwrap();
    let worker_ready = worker.create_connector("id", worker_handlers).unwrap();
    let (host_side, worker_side) = tokio::join!(host_ready, worker_ready);
    let (host_side, worker_side) = (host_side.unwrap(), worker_side.unwrap());

    let from_host = host_side.exec_peer("whoami", Value::Null, None).unwrap().await.unwrap();
    let from_worker = worker_side.exec_peer("whoami", Value::Null, None).unwrap().await.unwrap();
    assert_eq!(from_host.data, json!("worker"));
    assert_eq!(from_worker.data, json!("host"));
}

#[tokio::test]
async fn test_events_reach_peer_subscribers() {
    let host = TransportContext::new();
    let worker = TransportContext::new();
    let _sockets = link(&host, &worker, SocketRole::Control);

    let worker_side = worker.create_connector("feed", HandlerTable::new()).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = worker_side.connector().on("tick", move |event| {
        let _ = tx.send((event.data.clone(), event.payload.clone()));
    });
    let feed = host.create_connector("feed", HandlerTable::new()).unwrap().await.unwrap();

    feed.trigger_peer("tick", json!({"n": 1}), None).unwrap();
    feed.trigger_peer("tick", json!({"n": 2}), Some(Bytes::from_static(b"blob"))).unwrap();
    feed.trigger_peer("unwatched", json!({"n": 3}), None).unwrap();

    let first = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    let second = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(first, (json!({"n": 1}), None));
    assert_eq!(second, (json!({"n": 2}), Some(Bytes::from_static(b"blob"))));

    assert!(worker_side.connector().off(subscription));
    assert!(!worker_side.connector().off(subscription));
}

#[tokio::test]
async fn test_handshake_completes_in_either_order() {
    let host = TransportContext::new();
    let worker = TransportContext::new();

    // host creates before any socket exists, worker much later
    let mut host_ready = host.create_connector("late", HandlerTable::new()).unwrap();
    assert!(!host_ready.is_peer_ready());
    let _sockets = link(&host, &worker, SocketRole::Control);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(worker.is_peer_ready("late"));
    assert!(!host.is_peer_ready("late"));

    let worker_ready = worker.create_connector("late", echo_handlers()).unwrap();
    let (a, b) = tokio::time::timeout(WAIT, async { tokio::join!(host_ready, worker_ready) })
        .await
        .unwrap();
    assert_eq!(a.unwrap().name(), "late");
    assert_eq!(b.unwrap().name(), "late");
    assert!(host.is_peer_ready("late"));
}

#[tokio::test]
async fn test_calls_queue_until_socket_attached() {
    let host = TransportContext::new();
    let worker = TransportContext::new();
    worker.create_connector("echo", echo_handlers()).unwrap();

    let echo = host.create_connector("echo", HandlerTable::new()).unwrap().connector();
    let reply = echo.exec_peer("echo", json!({"queued": true}), None).unwrap();
    assert!(!host.is_connected());
    assert_eq!(host.queued_frames(), 2);

    let _sockets = link(&host, &worker, SocketRole::Control);
    assert_eq!(host.queued_frames(), 0);

    let reply = tokio::time::timeout(WAIT, reply).await.unwrap().unwrap();
    assert_eq!(reply.data, json!({"queued": true}));
}

#[tokio::test]
async fn test_queue_overflow_is_reported() {
    let host = TransportContext::builder().max_send_queue(2).build();
    let conn = host.create_connector("c", HandlerTable::new()).unwrap().connector();

    conn.trigger_peer("a", Value::Null, None).unwrap();
    let err = conn.trigger_peer("b", Value::Null, None).unwrap_err();
    assert!(matches!(err, ConnectorError::QueueOverflow { capacity: 2 }));

    let err = conn.exec_peer("f", Value::Null, None).unwrap_err();
    assert!(matches!(err, ConnectorError::QueueOverflow { .. }));
    assert_eq!(host.pending_calls(), 0);
}

#[tokio::test]
async fn test_large_payload_goes_to_large_data_socket() {
    let host = TransportContext::builder().large_data_threshold(16).build();
    let (_control, _control_sink, mut control) = raw_peer(&host, SocketRole::Control);
    let (_bulk, _bulk_sink, mut bulk) = raw_peer(&host, SocketRole::LargeData);

    assert_eq!(next_frame(&mut control).await.0, Envelope::ControlSocket);
    assert_eq!(next_frame(&mut bulk).await.0, Envelope::LargeDataSocket);

    let conn = host.create_connector("blob", HandlerTable::new()).unwrap().connector();
    assert!(matches!(
        next_frame(&mut control).await.0,
        Envelope::ConnectorCreated { .. }
    ));

    let small = Bytes::from_static(b"tiny");
    let large = Bytes::from(vec![7u8; 64]);
    conn.trigger_peer("small", json!({}), Some(small.clone())).unwrap();
    conn.trigger_peer("large", json!({}), Some(large.clone())).unwrap();

    let (envelope, payload) = next_frame(&mut control).await;
    assert!(matches!(envelope, Envelope::Event { ref event, .. } if event == "small"));
    assert_eq!(payload, Some(small));

    let (envelope, payload) = next_frame(&mut bulk).await;
    assert!(matches!(envelope, Envelope::Event { ref event, .. } if event == "large"));
    assert_eq!(payload, Some(large));
}

#[tokio::test]
async fn test_large_payload_round_trip_over_two_sockets() {
    let host = TransportContext::builder().large_data_threshold(1024).build();
    let worker = TransportContext::builder().large_data_threshold(1024).build();
    let _control = link(&host, &worker, SocketRole::Control);
    let _bulk = link(&host, &worker, SocketRole::LargeData);

    worker.create_connector("echo", echo_handlers()).unwrap();
    let echo = host.create_connector("echo", HandlerTable::new()).unwrap().await.unwrap();

    let big = Bytes::from((0..64 * 1024).map(|i| (i % 251) as u8).collect::<Vec<u8>>());
    let reply = echo.exec_peer("echo", json!({}), Some(big.clone())).unwrap().await.unwrap();
    assert_eq!(reply.payload, Some(big));
}

#[tokio::test]
async fn test_response_returns_on_origin_socket() {
    let host = TransportContext::new();
    let (_control, _control_sink, mut control) = raw_peer(&host, SocketRole::Control);
    let (_bulk, bulk_sink, mut bulk) = raw_peer(&host, SocketRole::LargeData);
    next_frame(&mut control).await;
    next_frame(&mut bulk).await;

    host.create_connector("echo", echo_handlers()).unwrap();
    next_frame(&mut control).await;

    let exec = Envelope::Exec {
        command_id: 41,
        connector: "echo".to_string(),
        function: "echo".to_string(),
        data: json!({"via": "bulk"}),
    };
    bulk_sink
        .send(Inbound::Binary(build_frame(&exec, None).unwrap()))
        .unwrap();

    let (envelope, _) = next_frame(&mut bulk).await;
    assert_eq!(envelope, Envelope::reply(41, json!({"via": "bulk"})));
}

#[tokio::test(start_paused = true)]
async fn test_call_times_out_without_response() {
    let host = TransportContext::builder()
        .call_timeout(Duration::from_secs(5))
        .build();
    let (_socket, _peer_sink, _peer_source) = raw_peer(&host, SocketRole::Control);

    let conn = host.create_connector("silent", HandlerTable::new()).unwrap().connector();
    let reply = conn.exec_peer("wait", Value::Null, None).unwrap();
    let id = reply.id();

    let err = reply.await.unwrap_err();
    assert!(matches!(err, ConnectorError::CallTimeout(timed_out) if timed_out == id));
    assert_eq!(host.pending_calls(), 0);
}

#[tokio::test]
async fn test_parked_call_runs_once_connector_exists() {
    let host = TransportContext::new();
    let worker = TransportContext::builder()
        .park_unknown_connectors(Duration::from_secs(10))
        .build();
    let _sockets = link(&host, &worker, SocketRole::Control);

    let early = host.create_connector("early", HandlerTable::new()).unwrap().connector();
    let reply = early.exec_peer("echo", json!({"parked": true}), None).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    worker.create_connector("early", echo_handlers()).unwrap();
    let reply = tokio::time::timeout(WAIT, reply).await.unwrap().unwrap();
    assert_eq!(reply.data, json!({"parked": true}));
}

#[tokio::test(start_paused = true)]
async fn test_parked_call_expires_with_no_such_connector() {
    let host = TransportContext::new();
    let worker = TransportContext::builder()
        .park_unknown_connectors(Duration::from_secs(10))
        .build();
    let _sockets = link(&host, &worker, SocketRole::Control);

    let ghost = host.create_connector("ghost", HandlerTable::new()).unwrap().connector();
    let started = tokio::time::Instant::now();
    let err = ghost.exec_peer("boo", Value::Null, None).unwrap().await.unwrap_err();

    assert_eq!(remote_code(&err), ErrorCode::NoSuchConnector);
    assert!(started.elapsed() >= Duration::from_secs(10));
}

#[tokio::test]
async fn test_payload_requires_object_data() {
    let host = TransportContext::new();
    let conn = host.create_connector("c", HandlerTable::new()).unwrap().connector();

    let err = conn
        .exec_peer("f", json!([1, 2]), Some(Bytes::from_static(b"x")))
        .unwrap_err();
    assert!(matches!(err, ConnectorError::InvalidPayloadArgument(_)));

    conn.exec_peer("f", Value::Null, Some(Bytes::from_static(b"x"))).unwrap();
}

#[tokio::test]
async fn test_echo_over_websocket() {
    let worker = TransportContext::new();
    let path = ws::generate_endpoint_path();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}{}", listener.local_addr().unwrap(), path);
    let server = tokio::spawn(ws::serve(listener, path, worker.clone(), ws::WsConfig::default()));
    worker.create_connector("echo", echo_handlers()).unwrap();

    let host = TransportContext::new();
    let mut control = ws::maintain_connection(
        host.clone(),
        url.clone(),
        SocketRole::Control,
        ws::WsConfig::default(),
    );
    let mut bulk = ws::maintain_connection(host.clone(), url, SocketRole::LargeData, ws::WsConfig::default());
    tokio::time::timeout(WAIT, control.connected()).await.unwrap().unwrap();
    tokio::time::timeout(WAIT, bulk.connected()).await.unwrap().unwrap();
    assert!(host.has_socket(SocketRole::Control));
    assert!(host.has_socket(SocketRole::LargeData));

    let echo = tokio::time::timeout(WAIT, host.create_connector("echo", HandlerTable::new()).unwrap())
        .await
        .unwrap()
        .unwrap();
    let payload = Bytes::from_static(b"over the wire");
    let reply = tokio::time::timeout(
        WAIT,
        echo.exec_peer("echo", json!({"ws": true}), Some(payload.clone())).unwrap(),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(reply.data, json!({"ws": true}));
    assert_eq!(reply.payload, Some(payload));

    control.stop();
    bulk.stop();
    server.abort();
}
