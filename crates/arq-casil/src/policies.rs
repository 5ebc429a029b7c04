// SPDX-License-Identifier: MIT OR Apache-2.0
//! Hygiene policies: oversize payloads and probable secrets.

use arq_core::Envelope;
use serde_json::Value;

use crate::CompiledPolicy;

/// What the policy pass found. The engine maps findings to a decision
/// according to the mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyFindings {
    /// Serialized payload size in bytes.
    pub payload_bytes: usize,
    /// Payload exceeds `max_payload_bytes`.
    pub oversize: bool,
    /// A redaction pattern matched a payload string and
    /// `block_on_probable_secret` is set.
    pub probable_secret: bool,
}

/// Evaluate the hygiene policies against one envelope.
#[must_use]
pub fn evaluate_policies(envelope: &Envelope, policy: &CompiledPolicy) -> PolicyFindings {
    let payload_bytes = envelope.payload_bytes();

    let oversize = policy
        .config
        .policies
        .max_payload_bytes
        .is_some_and(|max| payload_bytes > max);

    let probable_secret = policy.config.policies.block_on_probable_secret
        && envelope
            .payload
            .values()
            .any(|value| any_string_matches(value, policy));

    PolicyFindings {
        payload_bytes,
        oversize,
        probable_secret,
    }
}

fn any_string_matches(value: &Value, policy: &CompiledPolicy) -> bool {
    match value {
        Value::String(s) => policy.patterns.iter().any(|re| re.is_match(s)),
        Value::Array(items) => items.iter().any(|v| any_string_matches(v, policy)),
        Value::Object(map) => map.values().any(|v| any_string_matches(v, policy)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CasilConfig, CasilMode, CompiledPolicy};
    use arq_core::EnvelopeType;
    use serde_json::json;

    fn policy(max: Option<usize>, secret: bool, patterns: &[&str]) -> CompiledPolicy {
        let mut config = CasilConfig {
            enabled: true,
            mode: CasilMode::Enforce,
            ..CasilConfig::default()
        };
        config.policies.max_payload_bytes = max;
        config.policies.block_on_probable_secret = secret;
        config.policies.redaction.patterns = patterns.iter().map(|s| s.to_string()).collect();
        CompiledPolicy::compile(config).expect("compile policy")
    }

    fn envelope_with(payload: serde_json::Value) -> Envelope {
        let map = match payload {
            serde_json::Value::Object(m) => m.into_iter().collect(),
            _ => unreachable!("tests pass objects"),
        };
        Envelope::builder(EnvelopeType::Message)
            .room("secure")
            .channel("room")
            .payload(map)
            .build()
    }

    #[test]
    fn detects_oversize() {
        let policy = policy(Some(5), false, &[]);
        let env = envelope_with(json!({"data": "123456"}));
        let findings = evaluate_policies(&env, &policy);
        assert!(findings.oversize);
        assert!(findings.payload_bytes > 5);
    }

    #[test]
    fn detects_probable_secret_in_nested_values() {
        let policy = policy(None, true, &["secret"]);
        let env = envelope_with(json!({"outer": {"inner": ["super secret token"]}}));
        assert!(evaluate_policies(&env, &policy).probable_secret);
    }

    #[test]
    fn no_findings_without_thresholds() {
        let policy = policy(None, false, &["secret"]);
        let env = envelope_with(json!({"data": "super secret token"}));
        let findings = evaluate_policies(&env, &policy);
        assert!(!findings.oversize);
        assert!(!findings.probable_secret);
    }
}
