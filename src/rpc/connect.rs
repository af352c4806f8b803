//! Connect protocol framing (JSON codec only).
//!
//! Unary calls use `application/json` bodies as-is. Streaming calls use
//! `application/connect+json`, where every message is wrapped in an
//! envelope: one flag byte, a big-endian `u32` length, then the payload.
//! The final envelope carries [`FLAG_END_STREAM`] and a JSON trailer that
//! holds the error, if any.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::{json, Value};
use tonic::Status;

use super::status::connect_error_body;

pub const FLAG_COMPRESSED: u8 = 0x01;
pub const FLAG_END_STREAM: u8 = 0x02;

const ENVELOPE_HEADER_LEN: usize = 5;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_CONNECT_JSON: &str = "application/connect+json";

/// Wire convention chosen from the request content type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Unary,
    Streaming,
}

impl Protocol {
    /// `None` for content types we do not speak (including protobuf)
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let media = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match media.as_str() {
            CONTENT_TYPE_JSON => Some(Protocol::Unary),
            CONTENT_TYPE_CONNECT_JSON => Some(Protocol::Streaming),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Protocol::Unary => CONTENT_TYPE_JSON,
            Protocol::Streaming => CONTENT_TYPE_CONNECT_JSON,
        }
    }
}

pub fn encode_frame(flags: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(ENVELOPE_HEADER_LEN + payload.len());
    buf.put_u8(flags);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Envelope for one stream message
pub fn message_frame(message: &Value) -> Result<Bytes, Status> {
    let payload = serde_json::to_vec(message).map_err(|e| Status::internal(format!("failed to encode message: {e}")))?;
    Ok(encode_frame(0, &payload))
}

/// Final envelope, `{}` on success or `{"error": {...}}`
pub fn end_stream_frame(error: Option<&Status>) -> Bytes {
    let trailer = match error {
        Some(status) => json!({ "error": connect_error_body(status) }),
        None => json!({}),
    };
    encode_frame(FLAG_END_STREAM, trailer.to_string().as_bytes())
}

/// Unwrap the single enveloped request message of a server-stream call
pub fn decode_request_envelope(body: &[u8]) -> Result<Bytes, Status> {
    if body.len() < ENVELOPE_HEADER_LEN {
        return Err(Status::invalid_argument("truncated envelope"));
    }

    let flags = body[0];
    if flags & FLAG_COMPRESSED != 0 {
        return Err(Status::unimplemented("compressed messages are not supported"));
    }

    let len = u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;
    let payload = &body[ENVELOPE_HEADER_LEN..];
    if payload.len() != len {
        return Err(Status::invalid_argument(format!(
            "envelope length {len} does not match payload of {} bytes",
            payload.len()
        )));
    }

    Ok(Bytes::copy_from_slice(payload))
}

/// Split an enveloped response body into `(flags, payload)` pairs
pub fn decode_frames(mut body: &[u8]) -> Result<Vec<(u8, Bytes)>, Status> {
    let mut frames = Vec::new();
    while !body.is_empty() {
        if body.len() < ENVELOPE_HEADER_LEN {
            return Err(Status::invalid_argument("truncated envelope"));
        }
        let len = u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;
        let end = ENVELOPE_HEADER_LEN + len;
        if body.len() < end {
            return Err(Status::invalid_argument("truncated envelope payload"));
        }
        frames.push((body[0], Bytes::copy_from_slice(&body[ENVELOPE_HEADER_LEN..end])));
        body = &body[end..];
    }
    Ok(frames)
}
