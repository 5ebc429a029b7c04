// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical JSON codec.
//!
//! The JSON surface is exactly the serde shape of [`Envelope`]: field names
//! from the contract, optionals omitted, timestamps RFC3339 with explicit
//! offset.

use arq_core::Envelope;

use crate::WireError;

/// Stateless JSON codec for [`Envelope`]s.
///
/// # Examples
///
/// ```
/// use arq_core::{Envelope, JsonMap};
/// use arq_wire::JsonCodec;
///
/// let env = Envelope::message("science", "general", JsonMap::new());
/// let text = JsonCodec::encode(&env).unwrap();
/// let back = JsonCodec::decode(&text).unwrap();
/// assert_eq!(back, env);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Serialize an envelope to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Json`] if serialization fails.
    pub fn encode(envelope: &Envelope) -> Result<String, WireError> {
        Ok(serde_json::to_string(envelope)?)
    }

    /// Deserialize an envelope from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Json`] if the text is not a valid envelope
    /// object.
    pub fn decode(text: &str) -> Result<Envelope, WireError> {
        Ok(serde_json::from_str(text)?)
    }
}
