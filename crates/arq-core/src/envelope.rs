// SPDX-License-Identifier: MIT OR Apache-2.0
//! The uniform frame carried by every ArqonBus connection.
//!
//! An [`Envelope`] is intentionally a single struct rather than an enum per
//! frame kind: the routed surface (`room`, `channel`), the command surface
//! (`command`, `args`), and the response surface (`request_id`, `status`,
//! `error_code`) co-exist, and [`EnvelopeType`] selects which of them is
//! meaningful. Validation of that selection lives in
//! [`crate::validate::EnvelopeValidator`].

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::generate_message_id;

/// Free-form JSON mapping used for `payload`, `args`, and `metadata`.
///
/// `BTreeMap` keeps serialization deterministic, which the binary codec and
/// the golden wire fixtures rely on.
pub type JsonMap = BTreeMap<String, serde_json::Value>;

/// Frame discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeType {
    /// Routed chat/data frame, fanned out to a `(room, channel)`.
    Message,
    /// Admin/user command processed by the command lane.
    Command,
    /// Correlated reply to a command (`request_id` set).
    Response,
    /// Observability frame; persisted, optionally routed.
    Telemetry,
    /// Result frame produced by an operator for a dispatched task.
    OperatorResult,
}

impl EnvelopeType {
    /// Wire name of the type (`"operator_result"` etc.).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Command => "command",
            Self::Response => "response",
            Self::Telemetry => "telemetry",
            Self::OperatorResult => "operator_result",
        }
    }
}

impl fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome marker carried by `response` envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// The command succeeded.
    Success,
    /// The command failed; `error_code` describes why.
    Error,
}

/// Recognized `metadata` keys.
///
/// The metadata map is open — unrecognized keys round-trip untouched — but
/// these keys have typed accessors on [`Envelope`].
pub mod metadata_keys {
    /// Tenant owning the envelope; the sequence domain.
    pub const TENANT_ID: &str = "tenant_id";
    /// Per-tenant monotonic sequence number stamped before persistence.
    pub const SEQUENCE: &str = "sequence";
    /// Node → counter causal clock.
    pub const VECTOR_CLOCK: &str = "vector_clock";
    /// Id of the envelope this one causally follows.
    pub const CAUSAL_PARENT_ID: &str = "causal_parent_id";
    /// Id of the cron job that emitted this envelope.
    pub const CRON_JOB_ID: &str = "cron_job_id";
}

fn default_version() -> String {
    crate::ENVELOPE_VERSION.to_string()
}

/// The single frame type exchanged over the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Canonical message id (`arq_…`).
    pub id: String,

    /// Frame discriminator.
    #[serde(rename = "type")]
    pub kind: EnvelopeType,

    /// Creation time. Serialized RFC3339 with an explicit `+00:00` offset;
    /// a trailing `Z` is accepted on ingest.
    #[serde(with = "timestamp_serde")]
    pub timestamp: DateTime<Utc>,

    /// Protocol version, `"1.0"` unless overridden.
    #[serde(default = "default_version")]
    pub version: String,

    /// Sending client id. Assigned by the server on ingress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,

    /// Target room for routed frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,

    /// Target channel within `room`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Free-form payload.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub payload: JsonMap,

    /// Dotted command name, present iff `kind == Command`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Command arguments.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: JsonMap,

    /// Id of the envelope this one responds to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Response outcome marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ResponseStatus>,

    /// Machine-readable error code on failed responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    /// Open metadata map; see [`metadata_keys`].
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: JsonMap,
}

/// RFC3339 with an explicit UTC offset on the way out, `Z` tolerated on the
/// way in. `chrono`'s default serde uses `Z`, which older peers reject.
mod timestamp_serde {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::AutoSi, false))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(de)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| D::Error::custom(format!("invalid RFC3339 timestamp {raw:?}: {e}")))
    }
}

impl Envelope {
    /// Start building an envelope of the given type with a fresh id and
    /// the current timestamp.
    #[must_use]
    pub fn builder(kind: EnvelopeType) -> EnvelopeBuilder {
        EnvelopeBuilder::new(kind)
    }

    /// A routed `message` envelope.
    #[must_use]
    pub fn message(room: impl Into<String>, channel: impl Into<String>, payload: JsonMap) -> Self {
        EnvelopeBuilder::new(EnvelopeType::Message)
            .room(room)
            .channel(channel)
            .payload(payload)
            .build()
    }

    /// A `command` envelope.
    #[must_use]
    pub fn command(command: impl Into<String>, args: JsonMap) -> Self {
        EnvelopeBuilder::new(EnvelopeType::Command)
            .command(command)
            .args(args)
            .build()
    }

    /// A successful `response` correlated to `request`.
    #[must_use]
    pub fn success_response(request: &Envelope, data: serde_json::Value) -> Self {
        let mut payload = JsonMap::new();
        payload.insert("data".to_string(), data);
        EnvelopeBuilder::new(EnvelopeType::Response)
            .request_id(request.id.clone())
            .status(ResponseStatus::Success)
            .payload(payload)
            .build()
    }

    /// A failed `response` correlated to `request`.
    #[must_use]
    pub fn error_response(
        request: &Envelope,
        code: crate::ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        let mut payload = JsonMap::new();
        payload.insert(
            "error".to_string(),
            serde_json::Value::String(message.into()),
        );
        EnvelopeBuilder::new(EnvelopeType::Response)
            .request_id(request.id.clone())
            .status(ResponseStatus::Error)
            .error_code(code.as_str())
            .payload(payload)
            .build()
    }

    /// `metadata.tenant_id`, when present and a string.
    #[must_use]
    pub fn tenant_id(&self) -> Option<&str> {
        self.metadata.get(metadata_keys::TENANT_ID)?.as_str()
    }

    /// `metadata.sequence`, when present and a non-negative integer.
    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        self.metadata.get(metadata_keys::SEQUENCE)?.as_u64()
    }

    /// Overwrite `metadata.sequence`.
    pub fn set_sequence(&mut self, sequence: u64) {
        self.metadata.insert(
            metadata_keys::SEQUENCE.to_string(),
            serde_json::Value::from(sequence),
        );
    }

    /// `metadata.vector_clock` decoded into a typed map. Entries that are
    /// not non-negative integers are absent from the result; the validator
    /// rejects such envelopes up front.
    #[must_use]
    pub fn vector_clock(&self) -> Option<BTreeMap<String, u64>> {
        let raw = self.metadata.get(metadata_keys::VECTOR_CLOCK)?.as_object()?;
        Some(
            raw.iter()
                .filter_map(|(node, v)| v.as_u64().map(|n| (node.clone(), n)))
                .collect(),
        )
    }

    /// Overwrite `metadata.vector_clock`.
    pub fn set_vector_clock(&mut self, clock: &BTreeMap<String, u64>) {
        let obj: serde_json::Map<String, serde_json::Value> = clock
            .iter()
            .map(|(node, n)| (node.clone(), serde_json::Value::from(*n)))
            .collect();
        self.metadata.insert(
            metadata_keys::VECTOR_CLOCK.to_string(),
            serde_json::Value::Object(obj),
        );
    }

    /// `metadata.causal_parent_id`, when present.
    #[must_use]
    pub fn causal_parent_id(&self) -> Option<&str> {
        self.metadata.get(metadata_keys::CAUSAL_PARENT_ID)?.as_str()
    }

    /// Approximate serialized payload size in bytes, as used by the CASIL
    /// oversize check.
    #[must_use]
    pub fn payload_bytes(&self) -> usize {
        serde_json::to_vec(&self.payload).map(|v| v.len()).unwrap_or(0)
    }
}

/// Builder backing every [`Envelope`] constructor above.
#[derive(Debug)]
pub struct EnvelopeBuilder {
    envelope: Envelope,
}

impl EnvelopeBuilder {
    /// New builder with a generated id and the current timestamp.
    #[must_use]
    pub fn new(kind: EnvelopeType) -> Self {
        Self {
            envelope: Envelope {
                id: generate_message_id(),
                kind,
                timestamp: Utc::now(),
                version: default_version(),
                sender: None,
                room: None,
                channel: None,
                payload: JsonMap::new(),
                command: None,
                args: JsonMap::new(),
                request_id: None,
                status: None,
                error_code: None,
                metadata: JsonMap::new(),
            },
        }
    }

    /// Override the generated id.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.envelope.id = id.into();
        self
    }

    /// Override the timestamp.
    #[must_use]
    pub fn timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.envelope.timestamp = ts;
        self
    }

    /// Set the sender client id.
    #[must_use]
    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.envelope.sender = Some(sender.into());
        self
    }

    /// Set the target room.
    #[must_use]
    pub fn room(mut self, room: impl Into<String>) -> Self {
        self.envelope.room = Some(room.into());
        self
    }

    /// Set the target channel.
    #[must_use]
    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.envelope.channel = Some(channel.into());
        self
    }

    /// Replace the payload map.
    #[must_use]
    pub fn payload(mut self, payload: JsonMap) -> Self {
        self.envelope.payload = payload;
        self
    }

    /// Insert a single payload entry.
    #[must_use]
    pub fn payload_entry(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.envelope.payload.insert(key.into(), value);
        self
    }

    /// Set the command name.
    #[must_use]
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.envelope.command = Some(command.into());
        self
    }

    /// Replace the args map.
    #[must_use]
    pub fn args(mut self, args: JsonMap) -> Self {
        self.envelope.args = args;
        self
    }

    /// Set the correlation id.
    #[must_use]
    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.envelope.request_id = Some(request_id.into());
        self
    }

    /// Set the response status.
    #[must_use]
    pub fn status(mut self, status: ResponseStatus) -> Self {
        self.envelope.status = Some(status);
        self
    }

    /// Set the error code.
    #[must_use]
    pub fn error_code(mut self, code: impl Into<String>) -> Self {
        self.envelope.error_code = Some(code.into());
        self
    }

    /// Insert a single metadata entry.
    #[must_use]
    pub fn metadata_entry(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.envelope.metadata.insert(key.into(), value);
        self
    }

    /// Replace the metadata map.
    #[must_use]
    pub fn metadata(mut self, metadata: JsonMap) -> Self {
        self.envelope.metadata = metadata;
        self
    }

    /// Consume the builder.
    #[must_use]
    pub fn build(self) -> Envelope {
        self.envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timestamp_serializes_with_explicit_offset() {
        let env = Envelope::builder(EnvelopeType::Message)
            .room("science")
            .channel("general")
            .build();
        let raw = serde_json::to_string(&env).unwrap();
        assert!(raw.contains("+00:00"));
        assert!(!raw.contains('Z'));
    }

    #[test]
    fn timestamp_accepts_z_suffix_on_ingest() {
        let raw = r#"{"id":"arq_01HZZZZZZZZZZZZZZZZZZZZZZZ","type":"message","version":"1.0",
            "timestamp":"2026-02-18T00:00:00Z","room":"science","payload":{"content":"hello"}}"#;
        let env: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.payload.get("content"), Some(&json!("hello")));
        assert_eq!(env.timestamp.to_rfc3339(), "2026-02-18T00:00:00+00:00");
    }

    #[test]
    fn version_defaults_when_absent() {
        let raw = r#"{"id":"arq_01HZZZZZZZZZZZZZZZZZZZZZZZ","type":"telemetry",
            "timestamp":"2026-02-18T00:00:00+00:00"}"#;
        let env: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.version, "1.0");
        assert_eq!(env.kind, EnvelopeType::Telemetry);
    }

    #[test]
    fn missing_optionals_are_omitted_on_the_wire() {
        let env = Envelope::command("op.store.get", JsonMap::new());
        let raw = serde_json::to_string(&env).unwrap();
        assert!(!raw.contains("\"room\""));
        assert!(!raw.contains("\"payload\""));
        assert!(!raw.contains("\"metadata\""));
        assert!(raw.contains("\"command\":\"op.store.get\""));
    }

    #[test]
    fn vector_clock_round_trips_through_metadata() {
        let mut env = Envelope::message("ops", "events", JsonMap::new());
        let clock = BTreeMap::from([("op-a".to_string(), 2u64), ("op-b".to_string(), 1u64)]);
        env.set_vector_clock(&clock);
        assert_eq!(env.vector_clock(), Some(clock));
    }

    #[test]
    fn error_response_carries_code_and_correlation() {
        let cmd = Envelope::command("op.casil.reload", JsonMap::new());
        let resp = Envelope::error_response(&cmd, crate::ErrorCode::Authorization, "admin only");
        assert_eq!(resp.request_id.as_deref(), Some(cmd.id.as_str()));
        assert_eq!(resp.status, Some(ResponseStatus::Error));
        assert_eq!(resp.error_code.as_deref(), Some("AUTHORIZATION_ERROR"));
    }
}
