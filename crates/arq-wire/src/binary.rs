// SPDX-License-Identifier: MIT OR Apache-2.0
//! Binary envelope codec.
//!
//! Protobuf wire framing: every field is key-prefixed
//! (`field_number << 3 | wire_type`) and length-delimited (wire type 2).
//! The field table is the cross-language contract — any implementation
//! writing these tags produces frames any other can read:
//!
//! | tag | field       | encoding            |
//! |-----|-------------|---------------------|
//! | 1   | id          | UTF-8               |
//! | 2   | type        | UTF-8 enum name     |
//! | 3   | timestamp   | RFC3339 UTF-8       |
//! | 4   | version     | UTF-8               |
//! | 5   | sender      | UTF-8               |
//! | 6   | room        | UTF-8               |
//! | 7   | channel     | UTF-8               |
//! | 8   | payload     | JSON object bytes   |
//! | 9   | command     | UTF-8               |
//! | 10  | args        | JSON object bytes   |
//! | 11  | request_id  | UTF-8               |
//! | 12  | status      | UTF-8 enum name     |
//! | 13  | error_code  | UTF-8               |
//! | 14  | metadata    | JSON object bytes   |
//!
//! Unknown tags of wire types 0/1/2/5 are skipped so newer peers can add
//! fields without breaking older readers.

use arq_core::{Envelope, EnvelopeType, JsonMap, ResponseStatus};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::WireError;

const TAG_ID: u64 = 1;
const TAG_TYPE: u64 = 2;
const TAG_TIMESTAMP: u64 = 3;
const TAG_VERSION: u64 = 4;
const TAG_SENDER: u64 = 5;
const TAG_ROOM: u64 = 6;
const TAG_CHANNEL: u64 = 7;
const TAG_PAYLOAD: u64 = 8;
const TAG_COMMAND: u64 = 9;
const TAG_ARGS: u64 = 10;
const TAG_REQUEST_ID: u64 = 11;
const TAG_STATUS: u64 = 12;
const TAG_ERROR_CODE: u64 = 13;
const TAG_METADATA: u64 = 14;

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn write_field(out: &mut Vec<u8>, tag: u64, bytes: &[u8]) {
    write_varint(out, (tag << 3) | u64::from(WIRE_LEN));
    write_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

fn write_str_field(out: &mut Vec<u8>, tag: u64, value: &str) {
    write_field(out, tag, value.as_bytes());
}

fn write_map_field(out: &mut Vec<u8>, tag: u64, map: &JsonMap) -> Result<(), WireError> {
    if map.is_empty() {
        return Ok(());
    }
    write_field(out, tag, &serde_json::to_vec(map)?);
    Ok(())
}

fn status_name(status: ResponseStatus) -> &'static str {
    match status {
        ResponseStatus::Success => "success",
        ResponseStatus::Error => "error",
    }
}

/// Encode an envelope into the binary wire form.
///
/// # Errors
///
/// Returns [`WireError::Json`] if a map field fails to serialize.
pub fn encode_binary(envelope: &Envelope) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::with_capacity(128);

    write_str_field(&mut out, TAG_ID, &envelope.id);
    write_str_field(&mut out, TAG_TYPE, envelope.kind.as_str());
    write_str_field(
        &mut out,
        TAG_TIMESTAMP,
        &envelope
            .timestamp
            .to_rfc3339_opts(SecondsFormat::AutoSi, false),
    );
    write_str_field(&mut out, TAG_VERSION, &envelope.version);
    if let Some(sender) = &envelope.sender {
        write_str_field(&mut out, TAG_SENDER, sender);
    }
    if let Some(room) = &envelope.room {
        write_str_field(&mut out, TAG_ROOM, room);
    }
    if let Some(channel) = &envelope.channel {
        write_str_field(&mut out, TAG_CHANNEL, channel);
    }
    write_map_field(&mut out, TAG_PAYLOAD, &envelope.payload)?;
    if let Some(command) = &envelope.command {
        write_str_field(&mut out, TAG_COMMAND, command);
    }
    write_map_field(&mut out, TAG_ARGS, &envelope.args)?;
    if let Some(request_id) = &envelope.request_id {
        write_str_field(&mut out, TAG_REQUEST_ID, request_id);
    }
    if let Some(status) = envelope.status {
        write_str_field(&mut out, TAG_STATUS, status_name(status));
    }
    if let Some(error_code) = &envelope.error_code {
        write_str_field(&mut out, TAG_ERROR_CODE, error_code);
    }
    write_map_field(&mut out, TAG_METADATA, &envelope.metadata)?;

    Ok(out)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn done(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn read_varint(&mut self) -> Result<u64, WireError> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = *self.bytes.get(self.pos).ok_or(WireError::Truncated)?;
            self.pos += 1;
            if shift >= 64 {
                return Err(WireError::InvalidVarint);
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let end = self.pos.checked_add(len).ok_or(WireError::Truncated)?;
        if end > self.bytes.len() {
            return Err(WireError::Truncated);
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_len_delimited(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.read_varint()?;
        self.read_bytes(usize::try_from(len).map_err(|_| WireError::Truncated)?)
    }

    fn skip(&mut self, wire_type: u8) -> Result<(), WireError> {
        match wire_type {
            WIRE_VARINT => {
                self.read_varint()?;
            }
            WIRE_FIXED64 => {
                self.read_bytes(8)?;
            }
            WIRE_LEN => {
                self.read_len_delimited()?;
            }
            WIRE_FIXED32 => {
                self.read_bytes(4)?;
            }
            other => return Err(WireError::UnsupportedWireType(other)),
        }
        Ok(())
    }
}

fn utf8(field: &'static str, bytes: &[u8]) -> Result<String, WireError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8 { field })
}

fn parse_type(name: &str) -> Result<EnvelopeType, WireError> {
    match name {
        "message" => Ok(EnvelopeType::Message),
        "command" => Ok(EnvelopeType::Command),
        "response" => Ok(EnvelopeType::Response),
        "telemetry" => Ok(EnvelopeType::Telemetry),
        "operator_result" => Ok(EnvelopeType::OperatorResult),
        other => Err(WireError::InvalidValue {
            field: "type",
            detail: format!("unknown envelope type {other:?}"),
        }),
    }
}

fn parse_status(name: &str) -> Result<ResponseStatus, WireError> {
    match name {
        "success" => Ok(ResponseStatus::Success),
        "error" => Ok(ResponseStatus::Error),
        other => Err(WireError::InvalidValue {
            field: "status",
            detail: format!("unknown status {other:?}"),
        }),
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, WireError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| WireError::InvalidValue {
            field: "timestamp",
            detail: e.to_string(),
        })
}

/// Decode an envelope from the binary wire form, skipping unknown fields.
///
/// # Errors
///
/// Returns a [`WireError`] when the frame is truncated, a varint is
/// malformed, a required field is missing, or a field holds an unusable
/// value.
pub fn decode_binary(bytes: &[u8]) -> Result<Envelope, WireError> {
    let mut reader = Reader::new(bytes);

    let mut id: Option<String> = None;
    let mut kind: Option<EnvelopeType> = None;
    let mut timestamp: Option<DateTime<Utc>> = None;
    let mut version: Option<String> = None;
    let mut sender = None;
    let mut room = None;
    let mut channel = None;
    let mut payload = JsonMap::new();
    let mut command = None;
    let mut args = JsonMap::new();
    let mut request_id = None;
    let mut status = None;
    let mut error_code = None;
    let mut metadata = JsonMap::new();

    while !reader.done() {
        let key = reader.read_varint()?;
        let tag = key >> 3;
        let wire_type = (key & 0x7) as u8;

        if wire_type != WIRE_LEN {
            // Known fields are all length-delimited; anything else is a
            // foreign field we only need to step over.
            reader.skip(wire_type)?;
            continue;
        }

        let data = reader.read_len_delimited()?;
        match tag {
            TAG_ID => id = Some(utf8("id", data)?),
            TAG_TYPE => kind = Some(parse_type(&utf8("type", data)?)?),
            TAG_TIMESTAMP => timestamp = Some(parse_timestamp(&utf8("timestamp", data)?)?),
            TAG_VERSION => version = Some(utf8("version", data)?),
            TAG_SENDER => sender = Some(utf8("sender", data)?),
            TAG_ROOM => room = Some(utf8("room", data)?),
            TAG_CHANNEL => channel = Some(utf8("channel", data)?),
            TAG_PAYLOAD => payload = serde_json::from_slice(data)?,
            TAG_COMMAND => command = Some(utf8("command", data)?),
            TAG_ARGS => args = serde_json::from_slice(data)?,
            TAG_REQUEST_ID => request_id = Some(utf8("request_id", data)?),
            TAG_STATUS => status = Some(parse_status(&utf8("status", data)?)?),
            TAG_ERROR_CODE => error_code = Some(utf8("error_code", data)?),
            TAG_METADATA => metadata = serde_json::from_slice(data)?,
            _ => {} // unknown length-delimited field, already consumed
        }
    }

    Ok(Envelope {
        id: id.ok_or(WireError::MissingField("id"))?,
        kind: kind.ok_or(WireError::MissingField("type"))?,
        timestamp: timestamp.ok_or(WireError::MissingField("timestamp"))?,
        version: version.unwrap_or_else(|| arq_core::ENVELOPE_VERSION.to_string()),
        sender,
        room,
        channel,
        payload,
        command,
        args,
        request_id,
        status,
        error_code,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn fixture() -> Envelope {
        Envelope::builder(EnvelopeType::Command)
            .id("arq_01HZZZZZZZZZZZZZZZZZZZZZZZ")
            .timestamp(Utc.with_ymd_and_hms(2026, 2, 20, 0, 0, 0).unwrap())
            .room("ops")
            .channel("control")
            .sender("client-a")
            .command("op.continuum.projector.status")
            .args(JsonMap::from([
                ("tenant_id".to_string(), json!("tenant-fixture")),
                ("limit".to_string(), json!(10)),
            ]))
            .payload_entry("content", json!("ping"))
            .metadata_entry("tenant_id", json!("tenant-fixture"))
            .build()
    }

    #[test]
    fn round_trip_preserves_core_fields() {
        let env = fixture();
        let decoded = decode_binary(&encode_binary(&env).unwrap()).unwrap();
        assert_eq!(decoded, env);
        assert_eq!(decoded.command.as_deref(), Some("op.continuum.projector.status"));
        assert_eq!(decoded.args.get("tenant_id"), Some(&json!("tenant-fixture")));
    }

    #[test]
    fn shared_fixture_frame_layout_is_stable() {
        let raw = encode_binary(&fixture()).unwrap();
        // Field 1 (id), wire type 2, 30-byte id. Any implementation of the
        // tag table must produce exactly this prefix.
        assert_eq!(raw[0], 0x0a);
        assert_eq!(raw[1], 30);
        assert_eq!(&raw[2..32], b"arq_01HZZZZZZZZZZZZZZZZZZZZZZZ");

        let decoded = decode_binary(&raw).unwrap();
        assert_eq!(decoded.id, "arq_01HZZZZZZZZZZZZZZZZZZZZZZZ");
        assert_eq!(decoded.kind, EnvelopeType::Command);
        assert_eq!(decoded.tenant_id(), Some("tenant-fixture"));
    }

    #[test]
    fn unknown_varint_field_is_skipped() {
        let env = Envelope::builder(EnvelopeType::Command)
            .id("arq_1700000000000000000_8_a1b2c3")
            .command("op.continuum.projector.status")
            .args(JsonMap::from([("tenant_id".to_string(), json!("tenant-a"))]))
            .metadata_entry("sequence", json!(11))
            .build();

        // Field 200, wire type varint, value 1.
        let mut raw = encode_binary(&env).unwrap();
        raw.extend_from_slice(&[0xc0, 0x0c, 0x01]);

        let decoded = decode_binary(&raw).unwrap();
        assert_eq!(decoded, env);
        assert_eq!(decoded.sequence(), Some(11));
    }

    #[test]
    fn unknown_length_delimited_field_is_skipped() {
        let env = Envelope::message("ops", "events", JsonMap::new());
        // Field 200, wire type 2, three payload bytes.
        let mut raw = encode_binary(&env).unwrap();
        raw.extend_from_slice(&[0xc2, 0x0c, 0x03, b'a', b'b', b'c']);
        assert_eq!(decode_binary(&raw).unwrap(), env);
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let raw = encode_binary(&fixture()).unwrap();
        assert!(matches!(
            decode_binary(&raw[..raw.len() - 3]),
            Err(WireError::Truncated) | Err(WireError::Json(_))
        ));
    }

    #[test]
    fn missing_required_fields_are_reported() {
        // A lone version field: no id, type, or timestamp.
        let mut raw = Vec::new();
        write_str_field(&mut raw, TAG_VERSION, "1.0");
        assert!(matches!(
            decode_binary(&raw),
            Err(WireError::MissingField("id"))
        ));
    }

    #[test]
    fn subsecond_timestamps_survive_the_round_trip() {
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_000).unwrap();
        let env = Envelope::builder(EnvelopeType::Telemetry).timestamp(ts).build();
        let decoded = decode_binary(&encode_binary(&env).unwrap()).unwrap();
        assert_eq!(decoded.timestamp, ts);
    }
}
