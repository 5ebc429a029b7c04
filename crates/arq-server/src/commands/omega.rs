// SPDX-License-Identifier: MIT OR Apache-2.0
//! `op.omega.*` — the Tier-Omega lab lane.
//!
//! The feature gate answers first: with the lane disabled every mutating
//! command returns `FEATURE_DISABLED` regardless of role. Enabled
//! mutations require the admin role outright.

use arq_core::{EnvelopeBuilder, EnvelopeType, JsonMap};
use serde_json::json;

use super::{CommandError, CommandResult, optional_object, optional_str, optional_u64, required_str};
use crate::bus::SocketBus;
use crate::config::OmegaRuntime;

impl SocketBus {
    fn omega_gate(&self) -> Result<(), CommandError> {
        if self.core().config.tier_omega.enabled {
            Ok(())
        } else {
            Err(CommandError::feature_disabled("Tier-Omega lane is disabled"))
        }
    }

    pub(crate) async fn cmd_omega_status(&self) -> CommandResult {
        let config = &self.core().config.tier_omega;
        Ok(json!({
            "enabled": config.enabled,
            "runtime": match config.runtime {
                Some(OmegaRuntime::Memory) => "memory",
                Some(OmegaRuntime::Firecracker) => "firecracker",
                None => "invalid",
            },
            "lab_room": config.lab_room,
            "lab_channel": config.lab_channel,
            "max_events": config.max_events,
            "max_substrates": config.max_substrates,
            "substrates": self.core().omega.substrate_count().await,
            "events": self.core().omega.event_count().await,
        }))
    }

    pub(crate) async fn cmd_omega_register(&self, args: &JsonMap, is_admin: bool) -> CommandResult {
        self.omega_gate()?;
        if !is_admin {
            return Err(CommandError::authorization(
                "op.omega.register_substrate requires the admin role",
            ));
        }

        let name = required_str(args, "name")?;
        let kind = optional_str(args, "kind").unwrap_or("sandbox");
        let substrate = self
            .core()
            .omega
            .register_substrate(name, kind)
            .await
            .map_err(|e| CommandError::validation(e.to_string()))?;

        Ok(json!({
            "substrate_id": substrate.substrate_id,
            "name": substrate.name,
            "kind": substrate.kind,
        }))
    }

    pub(crate) async fn cmd_omega_emit(&self, args: &JsonMap, is_admin: bool) -> CommandResult {
        self.omega_gate()?;
        if !is_admin {
            return Err(CommandError::authorization(
                "op.omega.emit_event requires the admin role",
            ));
        }

        let substrate_id = required_str(args, "substrate_id")?;
        let signal = required_str(args, "signal")?;
        let payload = optional_object(args, "payload");

        let event = self
            .core()
            .omega
            .emit_event(substrate_id, signal, payload)
            .await
            .map_err(|e| CommandError::validation(e.to_string()))?;

        // Surface the signal into the lab room for any observers.
        let config = &self.core().config.tier_omega;
        let broadcast = EnvelopeBuilder::new(EnvelopeType::Telemetry)
            .sender("omega")
            .room(config.lab_room.clone())
            .channel(config.lab_channel.clone())
            .payload(JsonMap::from([
                ("eventType".to_string(), json!("omega_signal")),
                ("event".to_string(), json!(event)),
            ]))
            .build();
        self.core().routing.router.route_message(&broadcast, "omega").await;

        Ok(json!({
            "event_id": event.event_id,
            "substrate_id": event.substrate_id,
            "signal": event.signal,
            "payload": event.payload,
        }))
    }

    pub(crate) async fn cmd_omega_list_events(&self, args: &JsonMap) -> CommandResult {
        let limit = optional_u64(args, "limit").unwrap_or(0) as usize;
        let events = self
            .core()
            .omega
            .list_events(optional_str(args, "substrate_id"), limit)
            .await;
        Ok(json!({ "count": events.len(), "events": events }))
    }
}
