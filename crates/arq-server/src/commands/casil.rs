// SPDX-License-Identifier: MIT OR Apache-2.0
//! `op.casil.*` — policy hot-reload and inspection. Admin only.

use arq_casil::{CasilConfig, CasilMode};
use arq_core::JsonMap;

use super::{CommandError, CommandResult, optional_bool, optional_str, optional_str_list, optional_u64};
use crate::bus::SocketBus;

/// Overlay the flattened reload arguments onto a base configuration.
fn apply_reload_args(base: &mut CasilConfig, args: &JsonMap) -> Result<(), CommandError> {
    if let Some(raw) = optional_str(args, "mode") {
        base.mode = CasilMode::parse(raw)
            .ok_or_else(|| CommandError::validation(format!("invalid CASIL mode: {raw}")))?;
    } else if args.contains_key("mode") {
        return Err(CommandError::validation("invalid CASIL mode: not a string"));
    }

    if let Some(enabled) = optional_bool(args, "enabled") {
        base.enabled = enabled;
    }
    if let Some(include) = optional_str_list(args, "include")? {
        base.scope.include = include;
    }
    if let Some(exclude) = optional_str_list(args, "exclude")? {
        base.scope.exclude = exclude;
    }
    if args.contains_key("max_payload_bytes") {
        base.policies.max_payload_bytes = optional_u64(args, "max_payload_bytes").map(|v| v as usize);
    }
    if let Some(block) = optional_bool(args, "block_on_probable_secret") {
        base.policies.block_on_probable_secret = block;
    }
    if let Some(paths) = optional_str_list(args, "redaction_paths")? {
        base.policies.redaction.paths = paths;
    }
    if let Some(patterns) = optional_str_list(args, "redaction_patterns")? {
        base.policies.redaction.patterns = patterns;
    }
    if let Some(transport) = optional_bool(args, "transport_redaction") {
        base.policies.redaction.transport_redaction = transport;
    }
    if let Some(never_log) = optional_str_list(args, "never_log_payload_for")? {
        base.policies.redaction.never_log_payload_for = never_log;
    }
    Ok(())
}

impl SocketBus {
    pub(crate) async fn cmd_casil_reload(&self, args: &JsonMap) -> CommandResult {
        let mut candidate = self.core().casil.snapshot().config.clone();
        apply_reload_args(&mut candidate, args)?;

        self.core()
            .casil
            .reload(candidate.clone())
            .map_err(|errors| CommandError::validation(errors.join("; ")))?;

        serde_json::to_value(&candidate)
            .map_err(|e| CommandError::validation(format!("failed to serialize config: {e}")))
    }

    pub(crate) async fn cmd_casil_get(&self) -> CommandResult {
        let snapshot = self.core().casil.snapshot();
        serde_json::to_value(&snapshot.config)
            .map_err(|e| CommandError::validation(format!("failed to serialize config: {e}")))
    }
}
