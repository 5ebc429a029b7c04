// SPDX-License-Identifier: MIT OR Apache-2.0
//! Payload masking.
//!
//! Three layers, applied in order of severity:
//!
//! 1. `never_log_payload_for` — for log targets, a matching room suppresses
//!    the whole payload behind [`REDACT_TOKEN`].
//! 2. `paths` — keys masked wherever they appear in the payload tree.
//! 3. `patterns` — matching substrings inside string values are masked.

use arq_core::JsonMap;
use serde_json::Value;

use crate::CompiledPolicy;

/// Replacement written over masked material.
pub const REDACT_TOKEN: &str = "[REDACTED]";

/// Where the redacted projection is headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedactionTarget {
    /// The envelope forwarded to recipients.
    Transport,
    /// A logging/telemetry projection.
    Logs,
}

/// Result of a redaction pass.
#[derive(Debug, Clone, PartialEq)]
pub enum RedactedPayload {
    /// Nothing matched; the payload is untouched.
    Unchanged,
    /// Some keys or substrings were masked.
    Masked(JsonMap),
    /// The entire payload is suppressed (log targets only).
    Suppressed,
}

/// Apply the configured masking rules to `payload`.
#[must_use]
pub fn redact_payload(
    payload: &JsonMap,
    policy: &CompiledPolicy,
    target: RedactionTarget,
    room: &str,
) -> RedactedPayload {
    if target == RedactionTarget::Logs
        && policy
            .never_log
            .as_ref()
            .is_some_and(|set| set.is_match(room))
    {
        return RedactedPayload::Suppressed;
    }

    let paths = &policy.config.policies.redaction.paths;
    if paths.is_empty() && policy.patterns.is_empty() {
        return RedactedPayload::Unchanged;
    }

    let mut changed = false;
    let masked: JsonMap = payload
        .iter()
        .map(|(key, value)| {
            let masked_value = mask_value(key, value, policy, &mut changed);
            (key.clone(), masked_value)
        })
        .collect();

    if changed {
        RedactedPayload::Masked(masked)
    } else {
        RedactedPayload::Unchanged
    }
}

fn mask_value(key: &str, value: &Value, policy: &CompiledPolicy, changed: &mut bool) -> Value {
    if policy.config.policies.redaction.paths.iter().any(|p| p == key) {
        *changed = true;
        return Value::String(REDACT_TOKEN.to_string());
    }

    match value {
        Value::String(s) => {
            let mut out = s.clone();
            for re in &policy.patterns {
                if re.is_match(&out) {
                    out = re.replace_all(&out, REDACT_TOKEN).into_owned();
                    *changed = true;
                }
            }
            Value::String(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| mask_value("", v, policy, changed))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), mask_value(k, v, policy, changed)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// The payload as it may be logged: suppressed, masked, or verbatim.
#[must_use]
pub fn log_projection(payload: &JsonMap, policy: &CompiledPolicy, room: &str) -> Value {
    match redact_payload(payload, policy, RedactionTarget::Logs, room) {
        RedactedPayload::Suppressed => Value::String(REDACT_TOKEN.to_string()),
        RedactedPayload::Masked(masked) => serde_json::to_value(masked).unwrap_or(Value::Null),
        RedactedPayload::Unchanged => serde_json::to_value(payload).unwrap_or(Value::Null),
    }
}
