//! Protocol module - wire format, envelopes, and frame types.
//!
//! This module implements the binary framing shared by both peers:
//! - 4-byte little-endian metadata length prefix
//! - JSON metadata tagged by `commandCode`
//! - optional raw payload filling the rest of the message

mod envelope;
mod frame;
mod wire_format;

pub use envelope::{command_code, Envelope};
pub use frame::{build_frame, Frame};
pub use wire_format::{
    decode_frame, encode_frame, encode_object, has_buffer_data, HAS_BUFFER_DATA,
    LARGE_DATA_THRESHOLD, MAX_METADATA_SIZE, SIZE_PREFIX_LEN,
};
