// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structured telemetry for policy outcomes.
//!
//! The bus publishes one of these for every non-ALLOW outcome, both as a
//! `telemetry` envelope and as a structured log line.

use arq_core::JsonMap;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::outcome::CasilOutcome;

/// One policy telemetry event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CasilTelemetryEvent {
    /// Decision wire name (`ALLOW_WITH_REDACTION`, `BLOCK`, …).
    pub decision: String,
    /// Reason code from the outcome.
    pub reason_code: String,
    /// Room the envelope targeted.
    pub room: String,
    /// Channel the envelope targeted.
    pub channel: String,
    /// Findings copied from the outcome.
    pub flags: JsonMap,
    /// Engine failure detail, empty when none.
    #[serde(default)]
    pub internal_error: String,
}

/// Build the telemetry event for an outcome.
#[must_use]
pub fn build_event(outcome: &CasilOutcome, room: &str, channel: &str) -> CasilTelemetryEvent {
    CasilTelemetryEvent {
        decision: outcome.decision.as_str().to_string(),
        reason_code: outcome.reason_code.clone(),
        room: room.to_string(),
        channel: channel.to_string(),
        flags: outcome.flags.clone(),
        internal_error: outcome.internal_error.clone().unwrap_or_default(),
    }
}

impl CasilTelemetryEvent {
    /// The event as a telemetry envelope payload.
    #[must_use]
    pub fn to_payload(&self) -> JsonMap {
        JsonMap::from([
            ("eventType".to_string(), json!("casil_outcome")),
            ("decision".to_string(), json!(self.decision)),
            ("reason_code".to_string(), json!(self.reason_code)),
            ("room".to_string(), json!(self.room)),
            ("channel".to_string(), json!(self.channel)),
            ("flags".to_string(), json!(self.flags)),
            ("internal_error".to_string(), json!(self.internal_error)),
        ])
    }
}
