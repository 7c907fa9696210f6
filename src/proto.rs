//! Minimal protobuf wire codec: just enough to write the request body and
//! parse every UMP part payload the server sends. No `.proto` file, no
//! codegen — the field numbers live in the callers (`request.rs`,
//! `handlers.rs`) and are hand-rolled here.
//!
//! Every message parses into a [`ParsedMessage`] — a field-number to
//! ordered-value-list map — and callers pull out the fields they care
//! about with the accessor methods, rather than a hand-unrolled
//! struct-and-match per message type. This mirrors real protobuf
//! reflection APIs.

use std::collections::HashMap;

use crate::error::SabrError;
use crate::varint::{decode_proto_varint, encode_proto_varint};

// ─── Writer ─────────────────────────────────────────────────────────────

pub struct ProtoWriter {
    buf: Vec<u8>,
}

impl ProtoWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn write_tag(&mut self, field: u32, wire_type: u8) {
        self.buf
            .extend_from_slice(&encode_proto_varint(((field as u64) << 3) | wire_type as u64));
    }

    pub fn write_varint_field(&mut self, field: u32, value: u64) {
        self.write_tag(field, 0);
        self.buf.extend_from_slice(&encode_proto_varint(value));
    }

    /// Varint field, skipped entirely when `value == 0` (protobuf's default
    /// elision rule for proto3 scalars).
    pub fn write_varint_field_nonzero(&mut self, field: u32, value: u64) {
        if value != 0 {
            self.write_varint_field(field, value);
        }
    }

    pub fn write_bool(&mut self, field: u32, value: bool) {
        if value {
            self.write_varint_field(field, 1);
        }
    }

    pub fn write_string(&mut self, field: u32, value: &str) {
        if !value.is_empty() {
            self.write_length_delimited(field, value.as_bytes());
        }
    }

    pub fn write_bytes(&mut self, field: u32, value: &[u8]) {
        if !value.is_empty() {
            self.write_length_delimited(field, value);
        }
    }

    fn write_length_delimited(&mut self, field: u32, value: &[u8]) {
        self.write_tag(field, 2);
        self.buf
            .extend_from_slice(&encode_proto_varint(value.len() as u64));
        self.buf.extend_from_slice(value);
    }

    /// Embed a nested message, skipped when empty: an empty submessage and
    /// an absent one are indistinguishable on the wire, so there's no
    /// point sending it.
    pub fn write_message(&mut self, field: u32, nested: ProtoWriter) {
        let bytes = nested.finish();
        if !bytes.is_empty() {
            self.write_length_delimited(field, &bytes);
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for ProtoWriter {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Reader / generic parser ───────────────────────────────────────────

/// One decoded field value, tagged by the wire type it arrived with.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Varint(u64),
    Fixed64(i64),
    LengthDelimited(Vec<u8>),
    Fixed32(i32),
}

/// The result of parsing one protobuf message: every field number maps to
/// the ordered list of values seen for it, preserving wire-level
/// multiplicity (repeated fields, and packed-but-split encodings, show up
/// as multiple entries under the same key in wire order).
#[derive(Debug, Clone, Default)]
pub struct ParsedMessage {
    fields: HashMap<u32, Vec<FieldValue>>,
}

impl ParsedMessage {
    /// Parse `data` into a field map. Never fails: an unknown wire type or
    /// a length-delimited field whose declared length exceeds the
    /// remaining buffer simply terminates parsing and returns whatever was
    /// parsed so far.
    pub fn parse(data: &[u8]) -> Self {
        let mut fields: HashMap<u32, Vec<FieldValue>> = HashMap::new();
        let mut pos = 0usize;

        while pos < data.len() {
            let (tag, n) = match decode_proto_varint(data, pos) {
                Ok(v) => v,
                Err(_) => break,
            };
            pos += n;
            let field_number = (tag >> 3) as u32;
            let wire_type = (tag & 7) as u8;

            let value = match wire_type {
                0 => {
                    let (v, n) = match decode_proto_varint(data, pos) {
                        Ok(v) => v,
                        Err(_) => break,
                    };
                    pos += n;
                    FieldValue::Varint(v)
                }
                1 => {
                    if pos + 8 > data.len() {
                        break;
                    }
                    let v = i64::from_le_bytes(data[pos..pos + 8].try_into().unwrap());
                    pos += 8;
                    FieldValue::Fixed64(v)
                }
                2 => {
                    let (len, n) = match decode_proto_varint(data, pos) {
                        Ok(v) => v,
                        Err(_) => break,
                    };
                    pos += n;
                    let len = len as usize;
                    if pos + len > data.len() {
                        break;
                    }
                    let bytes = data[pos..pos + len].to_vec();
                    pos += len;
                    FieldValue::LengthDelimited(bytes)
                }
                5 => {
                    if pos + 4 > data.len() {
                        break;
                    }
                    let v = i32::from_le_bytes(data[pos..pos + 4].try_into().unwrap());
                    pos += 4;
                    FieldValue::Fixed32(v)
                }
                // Any other wire type (3/4, the deprecated group markers,
                // or garbage) terminates parsing gracefully.
                _ => break,
            };

            fields.entry(field_number).or_default().push(value);
        }

        Self { fields }
    }

    pub fn get(&self, field: u32) -> &[FieldValue] {
        self.fields.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn first_varint(&self, field: u32) -> Option<u64> {
        self.get(field).iter().find_map(|v| match v {
            FieldValue::Varint(n) => Some(*n),
            _ => None,
        })
    }

    pub fn first_bool(&self, field: u32) -> Option<bool> {
        self.first_varint(field).map(|n| n != 0)
    }

    pub fn first_bytes(&self, field: u32) -> Option<&[u8]> {
        self.get(field).iter().find_map(|v| match v {
            FieldValue::LengthDelimited(b) => Some(b.as_slice()),
            _ => None,
        })
    }

    pub fn first_string(&self, field: u32) -> Option<String> {
        self.first_bytes(field)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub fn first_submessage(&self, field: u32) -> Option<ParsedMessage> {
        self.first_bytes(field).map(ParsedMessage::parse)
    }

    pub fn all_submessages(&self, field: u32) -> Vec<ParsedMessage> {
        self.get(field)
            .iter()
            .filter_map(|v| match v {
                FieldValue::LengthDelimited(b) => Some(ParsedMessage::parse(b)),
                _ => None,
            })
            .collect()
    }

    pub fn all_varints(&self, field: u32) -> Vec<u64> {
        self.get(field)
            .iter()
            .filter_map(|v| match v {
                FieldValue::Varint(n) => Some(*n),
                _ => None,
            })
            .collect()
    }
}

pub fn parse(data: &[u8]) -> ParsedMessage {
    ParsedMessage::parse(data)
}

/// A UMP varint-framed `(type, payload)` tuple. See `ump.rs`.
pub type PartType = u32;

/// Split one UMP part payload's leading varint `headerId` from its
/// remaining bytes (used by the `MEDIA` and `MEDIA_END` handlers).
pub fn split_header_id(payload: &[u8]) -> Result<(u32, &[u8]), SabrError> {
    let (id, n) = crate::varint::decode_ump_varint(payload, 0)?
        .ok_or_else(|| SabrError::protocol("missing header id in MEDIA/MEDIA_END part"))?;
    Ok((id, &payload[n..]))
}
