// SPDX-License-Identifier: MIT OR Apache-2.0
//! Decisions and outcomes.

use arq_core::JsonMap;
use serde::{Deserialize, Serialize};

/// Reason codes attached to every outcome.
pub mod reason_codes {
    /// Feature gate closed.
    pub const DISABLED: &str = "CASIL_DISABLED";
    /// Room outside the configured scope.
    pub const OUT_OF_SCOPE: &str = "CASIL_OUT_OF_SCOPE";
    /// In scope, no policy tripped.
    pub const POLICY_ALLOWED: &str = "CASIL_POLICY_ALLOWED";
    /// Payload exceeded `max_payload_bytes`.
    pub const OVERSIZE_PAYLOAD: &str = "CASIL_OVERSIZE_PAYLOAD";
    /// A configured pattern matched payload material.
    pub const PROBABLE_SECRET: &str = "CASIL_PROBABLE_SECRET";
    /// Masking was applied.
    pub const REDACTION_APPLIED: &str = "CASIL_REDACTION_APPLIED";
    /// The engine failed internally; the envelope was allowed through.
    pub const INTERNAL_ERROR: &str = "CASIL_INTERNAL_ERROR";
}

/// The three possible answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CasilDecision {
    /// Pass untouched.
    Allow,
    /// Pass with masking applied (transport or log projection).
    AllowWithRedaction,
    /// Drop; the sender receives an error response.
    Block,
}

impl CasilDecision {
    /// Wire name of the decision.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "ALLOW",
            Self::AllowWithRedaction => "ALLOW_WITH_REDACTION",
            Self::Block => "BLOCK",
        }
    }
}

/// Outcome of one `process` call.
#[derive(Debug, Clone)]
pub struct CasilOutcome {
    /// The decision.
    pub decision: CasilDecision,
    /// Why; one of [`reason_codes`].
    pub reason_code: String,
    /// Findings for telemetry (`oversize`, `probable_secret`, …).
    pub flags: JsonMap,
    /// Populated when the engine itself failed.
    pub internal_error: Option<String>,
}

impl CasilOutcome {
    /// Plain ALLOW with the given reason.
    #[must_use]
    pub fn allow(reason_code: &str) -> Self {
        Self {
            decision: CasilDecision::Allow,
            reason_code: reason_code.to_string(),
            flags: JsonMap::new(),
            internal_error: None,
        }
    }
}
