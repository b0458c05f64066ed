//! Frame struct with typed accessors.
//!
//! A decoded frame keeps its metadata as a raw JSON object so the dispatcher
//! can still log frames whose `commandCode` it does not understand. Use
//! [`Frame::envelope`] to get the typed view.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use node_connector::protocol::{build_frame, Envelope, Frame};
//!
//! let bytes = build_frame(&Envelope::ControlSocket, None).unwrap();
//! let frame = Frame::decode(bytes).unwrap();
//!
//! assert_eq!(frame.command_code(), Some("controlSock"));
//! assert_eq!(frame.envelope().unwrap(), Envelope::ControlSocket);
//! ```

use bytes::Bytes;
use serde_json::{Map, Value};

use super::envelope::Envelope;
use super::wire_format::{decode_frame, encode_frame, has_buffer_data};
use crate::error::{ConnectorError, Result};
use crate::transport::Inbound;

/// A complete decoded frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Metadata object (includes `hasBufferData` when a payload was sent).
    pub metadata: Map<String, Value>,
    /// Payload bytes (zero-copy slice of the received message).
    pub payload: Option<Bytes>,
}

impl Frame {
    /// Decode a binary message.
    pub fn decode(bytes: Bytes) -> Result<Self> {
        let (metadata, payload) = decode_frame(bytes)?;
        Ok(Self { metadata, payload })
    }

    /// Decode whatever the transport delivered.
    ///
    /// Text messages are rejected with [`ConnectorError::NotABinaryFrame`].
    pub fn from_inbound(message: Inbound) -> Result<Self> {
        match message {
            Inbound::Binary(bytes) => Self::decode(bytes),
            Inbound::Text(_) => Err(ConnectorError::NotABinaryFrame),
        }
    }

    /// Get the raw `commandCode` field, if it is a string.
    #[inline]
    pub fn command_code(&self) -> Option<&str> {
        self.metadata.get("commandCode").and_then(Value::as_str)
    }

    /// Check whether the sender attached a payload (possibly empty).
    #[inline]
    pub fn has_buffer_data(&self) -> bool {
        has_buffer_data(&self.metadata)
    }

    /// Get the payload length (0 when absent).
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, Bytes::len)
    }

    /// Parse the metadata into a typed [`Envelope`].
    pub fn envelope(&self) -> Result<Envelope> {
        Ok(serde_json::from_value(Value::Object(self.metadata.clone()))?)
    }

    /// Split into typed envelope and payload, consuming the frame.
    pub fn into_parts(self) -> Result<(Envelope, Option<Bytes>)> {
        let envelope = serde_json::from_value(Value::Object(self.metadata))?;
        Ok((envelope, self.payload))
    }
}

/// Encode an envelope and optional payload into a wire frame.
///
/// # Example
///
/// ```
/// use node_connector::protocol::{build_frame, Envelope, SIZE_PREFIX_LEN};
///
/// let bytes = build_frame(&Envelope::LargeDataSocket, None).unwrap();
/// let text = br#"{"commandCode":"largeDataSock"}"#;
/// assert_eq!(bytes.len(), SIZE_PREFIX_LEN + text.len());
/// ```
pub fn build_frame(envelope: &Envelope, payload: Option<&Bytes>) -> Result<Bytes> {
    encode_frame(serde_json::to_value(envelope)?, payload)
}
