//! Command envelopes: the typed view of frame metadata.
//!
//! The `commandCode` field selects the variant; the remaining fields keep the
//! camelCase names JavaScript peers use, so frames interoperate unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RemoteError;

/// Command code strings as they appear on the wire.
pub mod command_code {
    /// Remote function invocation.
    pub const EXEC: &str = "exec";
    /// Fire-and-forget event.
    pub const EVENT: &str = "event";
    /// Response to an `exec`.
    pub const RESPONSE: &str = "response";
    /// Claims the sending socket as the control socket.
    pub const CONTROL_SOCKET: &str = "controlSock";
    /// Claims the sending socket as the large-data socket.
    pub const LARGE_DATA_SOCKET: &str = "largeDataSock";
    /// Announces a connector now exists on the sender's side.
    pub const NODE_CONNECTOR_CREATED: &str = "nodeConnectorCreated";
}

/// Decoded frame metadata, tagged by `commandCode`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "commandCode")]
pub enum Envelope {
    /// Call a named function on the peer's connector.
    #[serde(rename = "exec")]
    Exec {
        /// Correlation ID echoed back in the response.
        #[serde(rename = "commandID")]
        command_id: u64,
        /// Target connector name.
        #[serde(rename = "nodeConnectorID")]
        connector: String,
        /// Function to run in the connector's handler table.
        #[serde(rename = "execHandlerFnName")]
        function: String,
        /// JSON argument.
        #[serde(default)]
        data: Value,
    },

    /// Deliver an event to the peer connector's subscribers.
    #[serde(rename = "event")]
    Event {
        /// Target connector name.
        #[serde(rename = "nodeConnectorID")]
        connector: String,
        /// Event name subscribers listen on.
        #[serde(rename = "eventName")]
        event: String,
        /// JSON argument.
        #[serde(default)]
        data: Value,
    },

    /// Result of an earlier `exec`.
    #[serde(rename = "response")]
    Response {
        /// ID of the `exec` this answers.
        #[serde(rename = "commandID")]
        command_id: u64,
        /// Command code of the request (always `exec` today).
        #[serde(
            rename = "originalCommand",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        original_command: Option<String>,
        /// Error, if the call failed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<RemoteError>,
        /// JSON result.
        #[serde(default)]
        data: Value,
    },

    /// Socket role handshake: control.
    #[serde(rename = "controlSock")]
    ControlSocket,

    /// Socket role handshake: large data.
    #[serde(rename = "largeDataSock")]
    LargeDataSocket,

    /// Peer announcement carrying the connector name in `data`.
    #[serde(rename = "nodeConnectorCreated")]
    ConnectorCreated {
        /// Optional sequence ID (the JS loader sends one, nothing reads it).
        #[serde(rename = "commandID", default, skip_serializing_if = "Option::is_none")]
        command_id: Option<u64>,
        /// Connector name.
        #[serde(rename = "data")]
        connector: String,
    },
}

impl Envelope {
    /// Wire command code of this envelope.
    pub fn command_code(&self) -> &'static str {
        match self {
            Envelope::Exec { .. } => command_code::EXEC,
            Envelope::Event { .. } => command_code::EVENT,
            Envelope::Response { .. } => command_code::RESPONSE,
            Envelope::ControlSocket => command_code::CONTROL_SOCKET,
            Envelope::LargeDataSocket => command_code::LARGE_DATA_SOCKET,
            Envelope::ConnectorCreated { .. } => command_code::NODE_CONNECTOR_CREATED,
        }
    }

    /// Build a successful response to `command_id`.
    pub fn reply(command_id: u64, data: Value) -> Self {
        Envelope::Response {
            command_id,
            original_command: Some(command_code::EXEC.to_string()),
            error: None,
            data,
        }
    }

    /// Build an error response to `command_id`.
    pub fn reply_error(command_id: u64, error: RemoteError) -> Self {
        Envelope::Response {
            command_id,
            original_command: Some(command_code::EXEC.to_string()),
            error: Some(error),
            data: Value::Null,
        }
    }
}
