//! Command dispatcher: acts on each inbound frame.
//!
//! ```text
//! read loop ─► dispatch ─┬─ controlSock / largeDataSock ─► SocketRouter::bind
//!                        ├─ nodeConnectorCreated ────────► HandshakeTable::confirm
//!                        ├─ exec ──► registry ─► handler task ─► response
//!                        ├─ event ─► registry ─► subscribers
//!                        └─ response ────────────────────► PendingCalls::complete
//! ```
//!
//! Nothing here returns an error to the read loop. Failures while handling an
//! `exec` become an error `response` on the socket the request came in on;
//! everything else is logged and dropped.
//!
//! Frames that fail typed parsing are not simply dropped when they carry a
//! readable `commandID`: a malformed `exec` is still answered and a malformed
//! `response` still settles its call.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::connector::{
    invoke, ConnectorEntry, HandlerResult, ParkOutcome, ParkedFrame, PeerEvent, Reply,
};
use crate::context::TransportContext;
use crate::error::{ConnectorError, RemoteError, Result};
use crate::protocol::{build_frame, command_code, Envelope, Frame};
use crate::router::OutboundFrame;
use crate::transport::{Inbound, SocketRole};
use crate::writer::WriterHandle;

/// Handle one message received on `origin`.
pub(crate) fn dispatch(ctx: &TransportContext, origin: &WriterHandle, message: Inbound) {
    let frame = match Frame::from_inbound(message) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!("dropping message on {}: {}", origin.id(), e);
            return;
        }
    };

    let Some(code) = frame.command_code().map(str::to_owned) else {
        tracing::warn!("dropping frame without commandCode on {}", origin.id());
        return;
    };

    let command_id = frame.metadata.get("commandID").and_then(Value::as_u64);
    if code == command_code::EXEC {
        if let (Some(id), Err(e)) = (command_id, check_exec_target(ctx, &frame.metadata)) {
            tracing::warn!("{}", e);
            respond(ctx, origin, id, Err(e.into()));
            return;
        }
    }
    // error objects are small; kept in case the typed parse rejects them
    let raw_error = if code == command_code::RESPONSE {
        frame.metadata.get("error").filter(|e| !e.is_null()).cloned()
    } else {
        None
    };

    let (envelope, payload) = match frame.into_parts() {
        Ok(parts) => parts,
        Err(e) => {
            tracing::warn!("unsupported {} frame on {}: {}", code, origin.id(), e);
            if let Some(id) = command_id {
                settle_malformed(ctx, origin, &code, id, raw_error, e);
            }
            return;
        }
    };

    match envelope {
        Envelope::ControlSocket => ctx.router().lock().bind(origin.clone(), SocketRole::Control),
        Envelope::LargeDataSocket => ctx
            .router()
            .lock()
            .bind(origin.clone(), SocketRole::LargeData),
        Envelope::ConnectorCreated { connector, .. } => {
            tracing::debug!("peer created connector {}", connector);
            ctx.handshake().lock().confirm(&connector);
        }
        Envelope::Response {
            command_id,
            error,
            data,
            ..
        } => {
            let outcome = match error {
                Some(err) => Err(ConnectorError::Remote(err)),
                None => Ok(Reply { data, payload }),
            };
            if let Err(e) = ctx.pending().complete(command_id, outcome) {
                tracing::warn!("{}", e);
            }
        }
        envelope @ (Envelope::Exec { .. } | Envelope::Event { .. }) => deliver(
            ctx,
            ParkedFrame {
                origin: origin.clone(),
                envelope,
                payload,
            },
        ),
    }
}

/// Name the connector and function an `exec` targets, without parsing `data`.
///
/// A missing or non-string connector name is an unknown connector; a missing
/// or non-string function name is an unknown function.
fn check_exec_target(ctx: &TransportContext, metadata: &Map<String, Value>) -> Result<()> {
    let Some(connector) = metadata.get("nodeConnectorID").and_then(Value::as_str) else {
        return Err(ConnectorError::NoSuchConnector(raw_field(metadata, "nodeConnectorID")));
    };
    if metadata.get("execHandlerFnName").and_then(Value::as_str).is_some() {
        return Ok(());
    }
    if !ctx.registry().lock().contains(connector) {
        return Err(ConnectorError::NoSuchConnector(connector.to_string()));
    }
    Err(ConnectorError::NoSuchFn {
        connector: connector.to_string(),
        function: raw_field(metadata, "execHandlerFnName"),
    })
}

fn raw_field(metadata: &Map<String, Value>, key: &str) -> String {
    metadata
        .get(key)
        .map_or_else(|| "undefined".to_string(), Value::to_string)
}

/// Answer or settle a frame whose metadata did not match its command.
fn settle_malformed(
    ctx: &TransportContext,
    origin: &WriterHandle,
    code: &str,
    command_id: u64,
    raw_error: Option<Value>,
    err: ConnectorError,
) {
    match code {
        command_code::EXEC => {
            let reason = ConnectorError::InvalidPayloadArgument(err.to_string());
            respond(ctx, origin, command_id, Err(reason.into()));
        }
        command_code::RESPONSE => {
            let remote = match raw_error {
                Some(raw) => RemoteError::from_value(&raw),
                None => RemoteError::new(format!("Undecodable response: {}", err)),
            };
            if let Err(e) = ctx.pending().complete(command_id, Err(ConnectorError::Remote(remote))) {
                tracing::warn!("{}", e);
            }
        }
        _ => {}
    }
}

/// Run frames that were parked before their connector existed, in order.
pub(crate) fn replay(ctx: &TransportContext, entry: &Arc<ConnectorEntry>, parked: Vec<ParkedFrame>) {
    if parked.is_empty() {
        return;
    }
    tracing::debug!("replaying {} parked frames for {}", parked.len(), entry.name());
    for frame in parked {
        run(ctx, entry.clone(), frame);
    }
}

fn deliver(ctx: &TransportContext, frame: ParkedFrame) {
    let Some(name) = target(&frame.envelope).map(str::to_owned) else {
        return;
    };

    let outcome = match ctx.config().park_unknown_connectors {
        Some(timeout) => {
            let limit = ctx.config().max_parked_per_connector;
            let outcome = ctx.registry().lock().park(&name, frame, limit);
            if let ParkOutcome::Parked { first: true } = outcome {
                spawn_park_timer(ctx.clone(), name.clone(), timeout);
            }
            outcome
        }
        None => {
            let lookup = ctx.registry().lock().lookup(&name);
            match lookup {
                Ok(entry) => ParkOutcome::Registered(entry, frame),
                Err(e) => return reject(ctx, frame, e),
            }
        }
    };

    match outcome {
        ParkOutcome::Registered(entry, frame) => run(ctx, entry, frame),
        ParkOutcome::Parked { .. } => {
            tracing::debug!("parked frame for connector {} until it is created", name);
        }
        ParkOutcome::Overflow(frame) => {
            tracing::warn!("too many frames waiting for connector {}", name);
            reject(ctx, frame, ConnectorError::NoSuchConnector(name));
        }
    }
}

fn run(ctx: &TransportContext, entry: Arc<ConnectorEntry>, frame: ParkedFrame) {
    let ParkedFrame {
        origin,
        envelope,
        payload,
    } = frame;

    match envelope {
        Envelope::Exec {
            command_id,
            function,
            data,
            ..
        } => {
            let handler = match entry.handler(&function) {
                Ok(handler) => handler,
                Err(e) => {
                    tracing::warn!("{}", e);
                    respond(ctx, &origin, command_id, Err(e.into()));
                    return;
                }
            };

            let ctx = ctx.clone();
            let connector = entry.name().to_string();
            tokio::spawn(async move {
                let outcome = invoke(handler, data, payload).await;
                if let Err(err) = &outcome {
                    tracing::warn!("error executing {}::{}: {}", connector, function, err.message);
                }
                respond(&ctx, &origin, command_id, outcome);
            });
        }
        Envelope::Event { event, data, .. } => entry.emit(&PeerEvent {
            name: event,
            data,
            payload,
        }),
        other => tracing::warn!("cannot deliver {} frame to a connector", other.command_code()),
    }
}

/// Report that the frame's connector does not exist.
fn reject(ctx: &TransportContext, frame: ParkedFrame, err: ConnectorError) {
    match frame.envelope {
        Envelope::Exec { command_id, .. } => {
            tracing::warn!("{}", err);
            respond(ctx, &frame.origin, command_id, Err(err.into()));
        }
        Envelope::Event { event, .. } => {
            tracing::warn!("dropping event {}: {}", event, err);
        }
        _ => {}
    }
}

fn respond(ctx: &TransportContext, origin: &WriterHandle, command_id: u64, outcome: HandlerResult) {
    let (envelope, payload) = match outcome {
        Ok(reply) => (Envelope::reply(command_id, reply.data), reply.payload),
        Err(err) => (Envelope::reply_error(command_id, err), None),
    };
    let frame = match build_frame(&envelope, payload.as_ref()) {
        Ok(bytes) => OutboundFrame::new(bytes, payload.as_ref().map_or(0, Bytes::len)),
        Err(e) => {
            // result could not be encoded; tell the caller instead
            tracing::error!("failed to encode response {}: {}", command_id, e);
            let fallback = Envelope::reply_error(command_id, RemoteError::from(e));
            match build_frame(&fallback, None) {
                Ok(bytes) => OutboundFrame::new(bytes, 0),
                Err(_) => return,
            }
        }
    };

    if let Err(e) = ctx.router().lock().respond(origin, frame) {
        tracing::error!("failed to send response {}: {}", command_id, e);
    }
}

fn target(envelope: &Envelope) -> Option<&str> {
    match envelope {
        Envelope::Exec { connector, .. } | Envelope::Event { connector, .. } => Some(connector),
        _ => None,
    }
}

fn spawn_park_timer(ctx: TransportContext, name: String, timeout: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        let expired = ctx.registry().lock().expire(&name);
        if expired.is_empty() {
            return;
        }
        tracing::warn!(
            "connector {} was not created within {:?}, rejecting {} parked frames",
            name,
            timeout,
            expired.len()
        );
        for frame in expired {
            reject(&ctx, frame, ConnectorError::NoSuchConnector(name.clone()));
        }
    });
}
