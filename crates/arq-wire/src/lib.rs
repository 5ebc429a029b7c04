// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! arq-wire
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Binary (protobuf-framed) codec.
pub mod binary;
/// Canonical JSON codec.
pub mod json;

pub use binary::{decode_binary, encode_binary};
pub use json::JsonCodec;

use arq_core::{Envelope, EnvelopeValidator};
use thiserror::Error;

/// Which framing a set of raw bytes uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// Canonical JSON object.
    Json,
    /// Protobuf-framed binary.
    Protobuf,
}

impl WireFormat {
    /// Wire name (`"json"` / `"protobuf"`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Protobuf => "protobuf",
        }
    }
}

/// Errors from either codec.
#[derive(Debug, Error)]
pub enum WireError {
    /// JSON (de)serialization failure.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The binary frame ended mid-field.
    #[error("truncated binary frame")]
    Truncated,

    /// A varint ran past 64 bits.
    #[error("malformed varint")]
    InvalidVarint,

    /// A field key used a wire type this codec cannot skip.
    #[error("unsupported wire type {0}")]
    UnsupportedWireType(u8),

    /// A length-delimited field was not valid UTF-8 where text was expected.
    #[error("field {field} is not valid UTF-8")]
    InvalidUtf8 {
        /// Field name from the tag table.
        field: &'static str,
    },

    /// A required field was absent from the frame.
    #[error("missing required field {0}")]
    MissingField(&'static str),

    /// A field decoded but held an unusable value.
    #[error("invalid value for {field}: {detail}")]
    InvalidValue {
        /// Field name from the tag table.
        field: &'static str,
        /// What went wrong.
        detail: String,
    },
}

/// Sniff the framing of raw bytes: a first non-whitespace byte of `{` is
/// JSON, everything else is tried as binary.
#[must_use]
pub fn detect_wire_format(bytes: &[u8]) -> WireFormat {
    match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'{') => WireFormat::Json,
        _ => WireFormat::Protobuf,
    }
}

/// Decode raw bytes in whichever format they carry.
///
/// # Errors
///
/// Returns the codec error for the detected format.
pub fn decode_wire(bytes: &[u8]) -> Result<(Envelope, WireFormat), WireError> {
    match detect_wire_format(bytes) {
        WireFormat::Json => {
            let text = std::str::from_utf8(bytes)
                .map_err(|_| WireError::InvalidUtf8 { field: "frame" })?;
            Ok((JsonCodec::decode(text)?, WireFormat::Json))
        }
        WireFormat::Protobuf => Ok((decode_binary(bytes)?, WireFormat::Protobuf)),
    }
}

/// Detect, decode, and validate one inbound frame.
///
/// The envelope is `None` only when decoding itself failed; validation
/// findings are returned alongside a successfully decoded envelope so the
/// caller can answer with every violation at once.
#[must_use]
pub fn validate_and_parse_wire(bytes: &[u8]) -> (Option<Envelope>, Vec<String>, WireFormat) {
    let format = detect_wire_format(bytes);
    match decode_wire(bytes) {
        Ok((envelope, format)) => {
            let errors = EnvelopeValidator::validate(&envelope);
            (Some(envelope), errors, format)
        }
        Err(err) => (
            None,
            vec![format!("failed to decode {} frame: {err}", format.as_str())],
            format,
        ),
    }
}
