// SPDX-License-Identifier: MIT OR Apache-2.0
//! Envelope validation.
//!
//! The validator accumulates human-readable error strings; an empty list
//! means the envelope is acceptable. Wire-level detection and parsing live
//! in `arq-wire`, which feeds decoded envelopes through here.

use crate::envelope::{Envelope, EnvelopeType, metadata_keys};
use crate::ids::is_valid_message_id;

/// Error emitted when `metadata.vector_clock` carries anything other than
/// non-negative integer components.
pub const VECTOR_CLOCK_ERROR: &str = "vector_clock values must be non-negative integers";

/// Stateless structural and semantic validator for [`Envelope`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeValidator;

impl EnvelopeValidator {
    /// Validate a decoded envelope. Returns one message per violation;
    /// empty means valid.
    #[must_use]
    pub fn validate(envelope: &Envelope) -> Vec<String> {
        let mut errors = Vec::new();

        if envelope.id.is_empty() {
            errors.push("envelope id must not be empty".to_string());
        } else if !is_valid_message_id(&envelope.id) {
            errors.push(format!(
                "envelope id does not match the canonical arq_ format: {}",
                envelope.id
            ));
        }

        match envelope.kind {
            EnvelopeType::Command => {
                if envelope.command.as_deref().is_none_or(str::is_empty) {
                    errors.push("command envelopes require a command name".to_string());
                }
            }
            EnvelopeType::Message => {
                if envelope.room.as_deref().is_none_or(str::is_empty) {
                    errors.push("message envelopes require a room".to_string());
                }
            }
            EnvelopeType::Telemetry => {
                // Telemetry may be persist-only, but a channel without a
                // room is unroutable.
                if envelope.channel.is_some() && envelope.room.is_none() {
                    errors.push("telemetry with a channel requires a room".to_string());
                }
            }
            EnvelopeType::Response | EnvelopeType::OperatorResult => {
                if envelope.request_id.as_deref().is_none_or(str::is_empty) {
                    errors.push(format!(
                        "{} envelopes require a request_id",
                        envelope.kind
                    ));
                }
            }
        }

        if let Some(sequence) = envelope.metadata.get(metadata_keys::SEQUENCE)
            && sequence.as_u64().is_none()
        {
            errors.push("metadata.sequence must be a non-negative integer".to_string());
        }

        if let Some(clock) = envelope.metadata.get(metadata_keys::VECTOR_CLOCK) {
            match clock.as_object() {
                Some(entries) => {
                    if entries.values().any(|v| v.as_u64().is_none()) {
                        errors.push(VECTOR_CLOCK_ERROR.to_string());
                    }
                }
                None => errors.push(VECTOR_CLOCK_ERROR.to_string()),
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::JsonMap;
    use serde_json::json;

    #[test]
    fn routed_message_without_room_is_rejected() {
        let mut env = Envelope::message("science", "general", JsonMap::new());
        assert!(EnvelopeValidator::validate(&env).is_empty());

        env.room = None;
        let errors = EnvelopeValidator::validate(&env);
        assert!(errors.iter().any(|e| e.contains("require a room")));
    }

    #[test]
    fn command_requires_command_name() {
        let mut env = Envelope::command("op.store.get", JsonMap::new());
        assert!(EnvelopeValidator::validate(&env).is_empty());

        env.command = None;
        let errors = EnvelopeValidator::validate(&env);
        assert_eq!(errors, vec!["command envelopes require a command name"]);
    }

    #[test]
    fn persist_only_telemetry_is_valid_without_routing_hints() {
        let env = Envelope::builder(EnvelopeType::Telemetry)
            .payload_entry("eventType", json!("metric"))
            .build();
        assert!(EnvelopeValidator::validate(&env).is_empty());
    }

    #[test]
    fn malformed_id_is_rejected() {
        let env = Envelope::builder(EnvelopeType::Telemetry).id("nope").build();
        let errors = EnvelopeValidator::validate(&env);
        assert!(errors.iter().any(|e| e.contains("canonical arq_ format")));
    }

    #[test]
    fn negative_vector_clock_values_emit_the_exact_message() {
        let env = Envelope::builder(EnvelopeType::Message)
            .room("ops")
            .metadata_entry("vector_clock", json!({"node-a": -1}))
            .build();
        let errors = EnvelopeValidator::validate(&env);
        assert!(errors.contains(&VECTOR_CLOCK_ERROR.to_string()));
    }

    #[test]
    fn non_object_vector_clock_is_rejected() {
        let env = Envelope::builder(EnvelopeType::Message)
            .room("ops")
            .metadata_entry("vector_clock", json!("not-a-map"))
            .build();
        assert!(EnvelopeValidator::validate(&env).contains(&VECTOR_CLOCK_ERROR.to_string()));
    }

    #[test]
    fn response_requires_request_id() {
        let env = Envelope::builder(EnvelopeType::Response).build();
        let errors = EnvelopeValidator::validate(&env);
        assert!(errors.iter().any(|e| e.contains("request_id")));
    }

    #[test]
    fn fractional_sequence_is_rejected() {
        let env = Envelope::builder(EnvelopeType::Message)
            .room("ops")
            .metadata_entry("sequence", json!(1.5))
            .build();
        let errors = EnvelopeValidator::validate(&env);
        assert!(errors.iter().any(|e| e.contains("metadata.sequence")));
    }
}
