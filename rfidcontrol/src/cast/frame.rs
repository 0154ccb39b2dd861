//! Cast v2 wire framing.
//!
//! Every message is a 4-byte big-endian length followed by a protobuf
//! `CastMessage`. Only the string payload form is used, so the protobuf
//! fields are written and read by hand.

use crate::errors::{ControlError, Result};

/// Largest message accepted from a receiver.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

const FIELD_PROTOCOL_VERSION: u64 = 1;
const FIELD_SOURCE_ID: u64 = 2;
const FIELD_DESTINATION_ID: u64 = 3;
const FIELD_NAMESPACE: u64 = 4;
const FIELD_PAYLOAD_TYPE: u64 = 5;
const FIELD_PAYLOAD_UTF8: u64 = 6;

const WIRE_VARINT: u64 = 0;
const WIRE_LENGTH_DELIMITED: u64 = 2;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CastMessage {
    pub source_id: String,
    pub destination_id: String,
    pub namespace: String,
    pub payload: String,
}

impl CastMessage {
    pub fn new(source_id: &str, destination_id: &str, namespace: &str, payload: String) -> Self {
        Self {
            source_id: source_id.to_string(),
            destination_id: destination_id.to_string(),
            namespace: namespace.to_string(),
            payload,
        }
    }

    /// Serializes the message with its length prefix.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut body = Vec::with_capacity(64 + self.payload.len());
        write_varint_field(&mut body, FIELD_PROTOCOL_VERSION, 0); // CASTV2_1_0
        write_string_field(&mut body, FIELD_SOURCE_ID, &self.source_id);
        write_string_field(&mut body, FIELD_DESTINATION_ID, &self.destination_id);
        write_string_field(&mut body, FIELD_NAMESPACE, &self.namespace);
        write_varint_field(&mut body, FIELD_PAYLOAD_TYPE, 0); // STRING
        write_string_field(&mut body, FIELD_PAYLOAD_UTF8, &self.payload);

        if body.len() > MAX_FRAME_LEN {
            return Err(ControlError::protocol("cast frame too large"));
        }
        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Parses a message body (without its length prefix).
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = 0usize;
        let mut message = CastMessage::new("", "", "", String::new());

        while cursor < bytes.len() {
            let key = read_varint(bytes, &mut cursor)
                .ok_or_else(|| ControlError::protocol("invalid protobuf key"))?;
            let field = key >> 3;
            match key & 0x07 {
                WIRE_VARINT => {
                    read_varint(bytes, &mut cursor)
                        .ok_or_else(|| ControlError::protocol("invalid protobuf varint"))?;
                }
                WIRE_LENGTH_DELIMITED => {
                    let len = read_varint(bytes, &mut cursor)
                        .ok_or_else(|| ControlError::protocol("invalid protobuf length"))?
                        as usize;
                    let end = cursor
                        .checked_add(len)
                        .filter(|end| *end <= bytes.len())
                        .ok_or_else(|| ControlError::protocol("protobuf field out of bounds"))?;
                    let raw = &bytes[cursor..end];
                    cursor = end;
                    let target = match field {
                        FIELD_SOURCE_ID => &mut message.source_id,
                        FIELD_DESTINATION_ID => &mut message.destination_id,
                        FIELD_NAMESPACE => &mut message.namespace,
                        FIELD_PAYLOAD_UTF8 => &mut message.payload,
                        // payload_binary and unknown fields
                        _ => continue,
                    };
                    *target = String::from_utf8(raw.to_vec())
                        .map_err(|_| ControlError::protocol("invalid utf-8 in cast message"))?;
                }
                other => {
                    return Err(ControlError::protocol(format!(
                        "unsupported protobuf wire type {other}"
                    )));
                }
            }
        }

        Ok(message)
    }
}

fn write_varint_field(out: &mut Vec<u8>, field: u64, value: u64) {
    write_varint(out, (field << 3) | WIRE_VARINT);
    write_varint(out, value);
}

fn write_string_field(out: &mut Vec<u8>, field: u64, value: &str) {
    write_varint(out, (field << 3) | WIRE_LENGTH_DELIMITED);
    write_varint(out, value.len() as u64);
    out.extend_from_slice(value.as_bytes());
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn read_varint(bytes: &[u8], cursor: &mut usize) -> Option<u64> {
    let mut shift = 0u32;
    let mut value = 0u64;
    while *cursor < bytes.len() && shift <= 63 {
        let byte = bytes[*cursor];
        *cursor += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some(value);
        }
        shift += 7;
    }
    None
}
