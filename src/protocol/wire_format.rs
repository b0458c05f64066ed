//! Wire format encoding and decoding.
//!
//! Every WebSocket message carries exactly one frame:
//! ```text
//! ┌──────────────┬────────────────────┬─────────────────────┐
//! │ Metadata len │ Metadata           │ Payload (optional)  │
//! │ 4 bytes      │ L bytes            │ remaining bytes     │
//! │ uint32 LE    │ UTF-8 JSON object  │ raw binary          │
//! └──────────────┴────────────────────┴─────────────────────┘
//! ```
//!
//! The length prefix is Little Endian. When a payload is attached the
//! encoder injects `hasBufferData: true` into the metadata, which lets the
//! decoder tell a zero-length payload apart from no payload at all.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::{Map, Value};

use crate::error::{ConnectorError, Result};

/// Size of the metadata length prefix in bytes.
pub const SIZE_PREFIX_LEN: usize = 4;

/// Maximum encoded metadata size.
pub const MAX_METADATA_SIZE: usize = 4_294_000_000;

/// Payloads above this size prefer the large-data socket (2 MiB).
pub const LARGE_DATA_THRESHOLD: usize = 2 * 1024 * 1024;

/// Metadata key flagging that a payload follows (possibly empty).
pub const HAS_BUFFER_DATA: &str = "hasBufferData";

/// Encode metadata and an optional payload into one frame.
///
/// # Errors
///
/// - [`ConnectorError::InvalidMetadataType`] if `metadata` is not an object
/// - [`ConnectorError::MetadataTooLarge`] if the JSON text exceeds [`MAX_METADATA_SIZE`]
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use node_connector::protocol::{decode_frame, encode_frame};
/// use serde_json::json;
///
/// let frame = encode_frame(json!({"commandCode": "event"}), Some(&Bytes::from_static(b"hi"))).unwrap();
/// let (metadata, payload) = decode_frame(frame).unwrap();
/// assert_eq!(metadata["hasBufferData"], true);
/// assert_eq!(payload.unwrap(), Bytes::from_static(b"hi"));
/// ```
pub fn encode_frame(metadata: Value, payload: Option<&Bytes>) -> Result<Bytes> {
    let mut metadata = match metadata {
        Value::Object(map) => map,
        other => return Err(ConnectorError::InvalidMetadataType(json_type_name(&other))),
    };
    if payload.is_some() {
        metadata.insert(HAS_BUFFER_DATA.to_string(), Value::Bool(true));
    }
    encode_object(&metadata, payload)
}

/// Encode an already-built metadata object.
///
/// The caller is responsible for `hasBufferData`; use [`encode_frame`]
/// unless the map was produced by it.
pub fn encode_object(metadata: &Map<String, Value>, payload: Option<&Bytes>) -> Result<Bytes> {
    let metadata_bytes = serde_json::to_vec(metadata)?;
    if metadata_bytes.len() > MAX_METADATA_SIZE {
        return Err(ConnectorError::MetadataTooLarge(metadata_bytes.len()));
    }

    let payload_len = payload.map_or(0, Bytes::len);
    let mut buf = BytesMut::with_capacity(SIZE_PREFIX_LEN + metadata_bytes.len() + payload_len);
    buf.put_u32_le(metadata_bytes.len() as u32);
    buf.extend_from_slice(&metadata_bytes);
    if let Some(payload) = payload {
        buf.extend_from_slice(payload);
    }
    Ok(buf.freeze())
}

/// Decode a frame into its metadata object and optional payload.
///
/// The payload is a zero-copy slice of `frame`.
///
/// # Errors
///
/// Returns [`ConnectorError::MalformedFrame`] if the frame is shorter than its
/// prefix claims, or the metadata is not a UTF-8 JSON object.
pub fn decode_frame(frame: Bytes) -> Result<(Map<String, Value>, Option<Bytes>)> {
    if frame.len() < SIZE_PREFIX_LEN {
        return Err(ConnectorError::MalformedFrame(format!(
            "frame of {} bytes is shorter than the length prefix",
            frame.len()
        )));
    }

    let metadata_len = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    let metadata_end = SIZE_PREFIX_LEN
        .checked_add(metadata_len)
        .filter(|end| *end <= frame.len())
        .ok_or_else(|| {
            ConnectorError::MalformedFrame(format!(
                "metadata length {} exceeds frame size {}",
                metadata_len,
                frame.len()
            ))
        })?;

    let text = std::str::from_utf8(&frame[SIZE_PREFIX_LEN..metadata_end])
        .map_err(|e| ConnectorError::MalformedFrame(format!("metadata is not UTF-8: {}", e)))?;
    let metadata = match serde_json::from_str::<Value>(text)
        .map_err(|e| ConnectorError::MalformedFrame(format!("metadata is not JSON: {}", e)))?
    {
        Value::Object(map) => map,
        other => {
            return Err(ConnectorError::MalformedFrame(format!(
                "metadata should be an object, but was {}",
                json_type_name(&other)
            )))
        }
    };

    let payload = if frame.len() > metadata_end {
        Some(frame.slice(metadata_end..))
    } else if has_buffer_data(&metadata) {
        // sender attached a zero-length buffer
        Some(Bytes::new())
    } else {
        None
    };

    Ok((metadata, payload))
}

/// Check the `hasBufferData` flag of a metadata object.
#[inline]
pub fn has_buffer_data(metadata: &Map<String, Value>) -> bool {
    metadata
        .get(HAS_BUFFER_DATA)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
