// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! arq-casil
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Decision and outcome types.
pub mod outcome;
/// Oversize and probable-secret checks.
pub mod policies;
/// Key, pattern, and whole-payload masking.
pub mod redaction;
/// Room scope matching.
pub mod scope;
/// Structured telemetry events.
pub mod telemetry;

pub use outcome::{CasilDecision, CasilOutcome, reason_codes};
pub use redaction::{REDACT_TOKEN, RedactedPayload, RedactionTarget};
pub use telemetry::CasilTelemetryEvent;

use std::sync::{Arc, RwLock};

use arq_core::{Envelope, JsonMap};
use globset::GlobSet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

/// Engine mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CasilMode {
    /// Feature gate closed; every envelope passes untouched.
    #[default]
    Disabled,
    /// Evaluate and flag, never block or mutate transport.
    Monitor,
    /// Block and redact per policy.
    Enforce,
}

impl CasilMode {
    /// Parse the wire/env form of the mode.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "disabled" => Some(Self::Disabled),
            "monitor" => Some(Self::Monitor),
            "enforce" => Some(Self::Enforce),
            _ => None,
        }
    }

    /// Wire name of the mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Monitor => "monitor",
            Self::Enforce => "enforce",
        }
    }
}

/// Which rooms the engine inspects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeConfig {
    /// Room globs in scope. Empty means every room.
    #[serde(default)]
    pub include: Vec<String>,
    /// Room globs excluded from scope. Exclude wins over include.
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Masking rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RedactionConfig {
    /// Payload keys masked wherever they appear.
    #[serde(default)]
    pub paths: Vec<String>,
    /// Regex patterns masked inside string values.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Apply masking to the envelope in flight, not just log projections.
    #[serde(default)]
    pub transport_redaction: bool,
    /// Room globs whose payloads are fully suppressed in log targets.
    #[serde(default)]
    pub never_log_payload_for: Vec<String>,
}

/// Policy thresholds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CasilPolicies {
    /// Maximum serialized payload size in bytes.
    #[serde(default)]
    pub max_payload_bytes: Option<usize>,
    /// Treat a redaction-pattern hit as a probable secret.
    #[serde(default)]
    pub block_on_probable_secret: bool,
    /// Masking rules.
    #[serde(default)]
    pub redaction: RedactionConfig,
}

/// Full engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CasilConfig {
    /// Feature gate.
    #[serde(default)]
    pub enabled: bool,
    /// Engine mode.
    #[serde(default)]
    pub mode: CasilMode,
    /// Room scope.
    #[serde(default)]
    pub scope: ScopeConfig,
    /// Thresholds and masking.
    #[serde(default)]
    pub policies: CasilPolicies,
}

/// Immutable compiled snapshot of a [`CasilConfig`].
///
/// Compilation happens once per reload; `process` only reads.
#[derive(Debug)]
pub struct CompiledPolicy {
    /// The source configuration, returned by `op.casil.get`.
    pub config: CasilConfig,
    pub(crate) include: Option<GlobSet>,
    pub(crate) exclude: Option<GlobSet>,
    pub(crate) patterns: Vec<Regex>,
    pub(crate) never_log: Option<GlobSet>,
}

impl CompiledPolicy {
    /// Compile a configuration, collecting every validation failure.
    ///
    /// # Errors
    ///
    /// Returns one message per invalid glob or regex; the caller keeps the
    /// previous snapshot on error.
    pub fn compile(config: CasilConfig) -> Result<Self, Vec<String>> {
        let mut errors = Vec::new();

        let include = scope::compile_globs(&config.scope.include, &mut errors);
        let exclude = scope::compile_globs(&config.scope.exclude, &mut errors);
        let never_log =
            scope::compile_globs(&config.policies.redaction.never_log_payload_for, &mut errors);

        let mut patterns = Vec::new();
        for raw in &config.policies.redaction.patterns {
            match Regex::new(raw) {
                Ok(re) => patterns.push(re),
                Err(e) => errors.push(format!("invalid redaction pattern {raw:?}: {e}")),
            }
        }

        if errors.is_empty() {
            Ok(Self {
                config,
                include,
                exclude,
                patterns,
                never_log,
            })
        } else {
            Err(errors)
        }
    }
}

/// Per-request context handed to [`CasilEngine::process`].
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Sending client id, for telemetry.
    pub client_id: String,
}

/// The hot-reloadable policy engine.
///
/// Readers take one `Arc` snapshot per request; `reload` swaps the whole
/// compiled policy atomically.
#[derive(Debug)]
pub struct CasilEngine {
    current: RwLock<Arc<CompiledPolicy>>,
}

impl CasilEngine {
    /// Build an engine from an initial configuration.
    ///
    /// # Errors
    ///
    /// Returns the compile errors of the initial configuration.
    pub fn new(config: CasilConfig) -> Result<Self, Vec<String>> {
        Ok(Self {
            current: RwLock::new(Arc::new(CompiledPolicy::compile(config)?)),
        })
    }

    /// Current compiled snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<CompiledPolicy> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Atomically replace the live configuration. On validation failure
    /// the previous configuration stays live.
    ///
    /// # Errors
    ///
    /// Returns the compile errors of the candidate configuration.
    pub fn reload(&self, config: CasilConfig) -> Result<(), Vec<String>> {
        let compiled = Arc::new(CompiledPolicy::compile(config)?);
        match self.current.write() {
            Ok(mut guard) => *guard = compiled,
            Err(poisoned) => *poisoned.into_inner() = compiled,
        }
        Ok(())
    }

    /// Inspect one envelope. In enforce mode with `transport_redaction`
    /// the envelope payload is mutated in place.
    pub fn process(&self, envelope: &mut Envelope, ctx: &RequestContext) -> CasilOutcome {
        let policy = self.snapshot();
        let config = &policy.config;

        if !config.enabled || config.mode == CasilMode::Disabled {
            return CasilOutcome::allow(reason_codes::DISABLED);
        }

        let room = envelope.room.clone().unwrap_or_default();
        if !scope::in_scope(&room, &policy) {
            return CasilOutcome::allow(reason_codes::OUT_OF_SCOPE);
        }

        let findings = policies::evaluate_policies(envelope, &policy);
        let mut flags = JsonMap::new();
        if findings.oversize {
            flags.insert("oversize".to_string(), json!(true));
            flags.insert("payload_bytes".to_string(), json!(findings.payload_bytes));
        }
        if findings.probable_secret {
            flags.insert("probable_secret".to_string(), json!(true));
        }

        let masked = redaction::redact_payload(
            &envelope.payload,
            &policy,
            RedactionTarget::Transport,
            &room,
        );
        let redaction_applies = !matches!(masked, RedactedPayload::Unchanged);

        let violation_reason = if findings.oversize {
            Some(reason_codes::OVERSIZE_PAYLOAD)
        } else if findings.probable_secret {
            Some(reason_codes::PROBABLE_SECRET)
        } else {
            None
        };

        let outcome = match config.mode {
            CasilMode::Disabled => CasilOutcome::allow(reason_codes::DISABLED),
            CasilMode::Monitor => {
                // Monitor observes: flag in metadata, never mutate transport.
                if !flags.is_empty() {
                    envelope
                        .metadata
                        .insert("casil_flags".to_string(), json!(flags.clone()));
                }
                let reason = violation_reason.unwrap_or(reason_codes::POLICY_ALLOWED);
                if redaction_applies {
                    CasilOutcome {
                        decision: CasilDecision::AllowWithRedaction,
                        reason_code: reason_codes::REDACTION_APPLIED.to_string(),
                        flags,
                        internal_error: None,
                    }
                } else {
                    CasilOutcome {
                        decision: CasilDecision::Allow,
                        reason_code: reason.to_string(),
                        flags,
                        internal_error: None,
                    }
                }
            }
            CasilMode::Enforce => match violation_reason {
                Some(reason) => {
                    if config.policies.redaction.transport_redaction && redaction_applies {
                        apply_masking(envelope, &masked);
                        CasilOutcome {
                            decision: CasilDecision::AllowWithRedaction,
                            reason_code: reason.to_string(),
                            flags,
                            internal_error: None,
                        }
                    } else {
                        CasilOutcome {
                            decision: CasilDecision::Block,
                            reason_code: reason.to_string(),
                            flags,
                            internal_error: None,
                        }
                    }
                }
                None => {
                    if redaction_applies {
                        if config.policies.redaction.transport_redaction {
                            apply_masking(envelope, &masked);
                        }
                        CasilOutcome {
                            decision: CasilDecision::AllowWithRedaction,
                            reason_code: reason_codes::REDACTION_APPLIED.to_string(),
                            flags,
                            internal_error: None,
                        }
                    } else {
                        CasilOutcome::allow(reason_codes::POLICY_ALLOWED)
                    }
                }
            },
        };

        if outcome.decision != CasilDecision::Allow {
            let event = telemetry::build_event(
                &outcome,
                &room,
                envelope.channel.as_deref().unwrap_or(""),
            );
            warn!(
                client_id = %ctx.client_id,
                decision = %event.decision,
                reason_code = %event.reason_code,
                room = %event.room,
                "casil outcome"
            );
        }

        outcome
    }
}

fn apply_masking(envelope: &mut Envelope, masked: &RedactedPayload) {
    match masked {
        RedactedPayload::Unchanged => {}
        RedactedPayload::Masked(payload) => envelope.payload = payload.clone(),
        RedactedPayload::Suppressed => {
            envelope.payload = JsonMap::from([("redacted".to_string(), json!(REDACT_TOKEN))]);
        }
    }
}
