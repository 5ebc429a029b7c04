// SPDX-License-Identifier: MIT OR Apache-2.0
//! The command lane.
//!
//! A static registry maps each command name to its required capability;
//! authorization runs before any handler. Responses are deterministic:
//! `type=response`, `request_id` = the command envelope's id, `status`
//! success/error, `payload.data` carrying the result object.

mod casil;
mod cron;
mod fabric;
mod history;
mod omega;
mod store;
mod webhook;

use arq_core::{Envelope, ErrorCode, JsonMap};
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::bus::SocketBus;

/// One entry in the static command registry.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    /// Dotted command name.
    pub name: &'static str,
    /// Capability checked through `check_permission`.
    pub capability: &'static str,
    /// Requires `role == "admin"` outright; a permissions grant is not
    /// enough.
    pub admin_only: bool,
}

const fn spec(name: &'static str, capability: &'static str) -> CommandSpec {
    CommandSpec {
        name,
        capability,
        admin_only: false,
    }
}

const fn admin_spec(name: &'static str, capability: &'static str) -> CommandSpec {
    CommandSpec {
        name,
        capability,
        admin_only: true,
    }
}

/// The full command registry, populated once at compile time.
pub const COMMANDS: &[CommandSpec] = &[
    spec("op.store.set", "store"),
    spec("op.store.get", "store"),
    spec("op.store.list", "store"),
    spec("op.store.delete", "store"),
    spec("op.webhook.register", "webhook_management"),
    spec("op.webhook.list", "webhook_management"),
    spec("op.webhook.unregister", "webhook_management"),
    spec("op.cron.schedule", "cron_management"),
    spec("op.cron.cancel", "cron_management"),
    spec("op.history.get", "history_read"),
    spec("op.history.replay", "history_read"),
    // Legacy alias kept for pre-namespace clients.
    spec("history.get", "history_read"),
    admin_spec("op.casil.reload", "casil_admin"),
    admin_spec("op.casil.get", "casil_admin"),
    spec("op.omega.status", "omega_read"),
    spec("op.omega.list_events", "omega_read"),
    // Feature gate answers before the admin check; see the handlers.
    spec("op.omega.register_substrate", "omega_admin"),
    spec("op.omega.emit_event", "omega_admin"),
    spec("room.join", "room_membership"),
    spec("room.leave", "room_membership"),
    spec("room.create", "room_management"),
    spec("channel.create", "channel_management"),
    spec("status", "status"),
    admin_spec("op.dispatch", "dispatch"),
    spec("op.operator.register", "operator_registration"),
    spec("op.operator.unregister", "operator_registration"),
];

/// Look a command up in the registry.
#[must_use]
pub fn find_command(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.name == name)
}

/// Error a handler surfaces into the response envelope.
#[derive(Debug, Clone)]
pub struct CommandError {
    /// Machine-readable code (`VALIDATION_ERROR`, …).
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

impl CommandError {
    /// A `VALIDATION_ERROR`.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Validation.as_str().to_string(),
            message: message.into(),
        }
    }

    /// An `AUTHORIZATION_ERROR`.
    #[must_use]
    pub fn authorization(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Authorization.as_str().to_string(),
            message: message.into(),
        }
    }

    /// A `FEATURE_DISABLED` error.
    #[must_use]
    pub fn feature_disabled(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::FeatureDisabled.as_str().to_string(),
            message: message.into(),
        }
    }
}

/// Handler outcome: the `payload.data` object, or a typed error.
pub type CommandResult = Result<Value, CommandError>;

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

pub(crate) fn required_str<'a>(args: &'a JsonMap, key: &str) -> Result<&'a str, CommandError> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CommandError::validation(format!("missing required argument: {key}")))
}

pub(crate) fn optional_str<'a>(args: &'a JsonMap, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

pub(crate) fn optional_bool(args: &JsonMap, key: &str) -> Option<bool> {
    args.get(key).and_then(Value::as_bool)
}

pub(crate) fn optional_u64(args: &JsonMap, key: &str) -> Option<u64> {
    args.get(key).and_then(Value::as_u64)
}

pub(crate) fn optional_object(args: &JsonMap, key: &str) -> JsonMap {
    args.get(key)
        .and_then(Value::as_object)
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

pub(crate) fn optional_str_list(
    args: &JsonMap,
    key: &str,
) -> Result<Option<Vec<String>>, CommandError> {
    match args.get(key) {
        None => Ok(None),
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item.as_str() {
                    Some(s) => out.push(s.to_string()),
                    None => {
                        return Err(CommandError::validation(format!(
                            "argument {key} must be a list of strings"
                        )));
                    }
                }
            }
            Ok(Some(out))
        }
        Some(_) => Err(CommandError::validation(format!(
            "argument {key} must be a list of strings"
        ))),
    }
}

pub(crate) fn required_timestamp(args: &JsonMap, key: &str) -> Result<DateTime<Utc>, CommandError> {
    let raw = required_str(args, key)?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CommandError::validation(format!("invalid {key}: {e}")))
}

pub(crate) fn optional_timestamp(
    args: &JsonMap,
    key: &str,
) -> Result<Option<DateTime<Utc>>, CommandError> {
    match optional_str(args, key) {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| CommandError::validation(format!("invalid {key}: {e}"))),
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

impl SocketBus {
    /// Authorization contract: unknown sender denies; `admin` allows; an
    /// explicit `permissions` list grants exactly its members (a
    /// malformed `permissions` value denies); absence of the field falls
    /// back to the legacy allow.
    pub async fn check_permission(&self, client_id: &str, capability: &str) -> bool {
        let Some(client) = self.core().routing.client_registry.get_client(client_id).await else {
            return false;
        };
        if client.metadata.get("role").and_then(Value::as_str) == Some("admin") {
            return true;
        }
        match client.metadata.get("permissions") {
            None => true,
            Some(Value::Array(perms)) => perms
                .iter()
                .any(|p| p.as_str() == Some(capability)),
            Some(_) => false,
        }
    }

    pub(crate) async fn is_admin(&self, client_id: &str) -> bool {
        self.core()
            .routing
            .client_registry
            .get_client(client_id)
            .await
            .is_some_and(|c| c.metadata.get("role").and_then(Value::as_str) == Some("admin"))
    }

    /// Process one `command` envelope end to end.
    pub async fn handle_command(&self, envelope: Envelope, client_id: &str) {
        let name = envelope.command.clone().unwrap_or_default();
        let Some(spec) = find_command(&name) else {
            self.respond_error_code(
                client_id,
                Some(&envelope.id),
                arq_core::ErrorCode::Validation.as_str(),
                &format!("unknown command: {name}"),
            )
            .await;
            return;
        };

        let is_admin = self.is_admin(client_id).await;
        if spec.admin_only && !is_admin {
            self.respond_error_code(
                client_id,
                Some(&envelope.id),
                arq_core::ErrorCode::Authorization.as_str(),
                &format!("{name} requires the admin role"),
            )
            .await;
            return;
        }
        if !self.check_permission(client_id, spec.capability).await {
            self.respond_error_code(
                client_id,
                Some(&envelope.id),
                arq_core::ErrorCode::Authorization.as_str(),
                &format!("missing capability: {}", spec.capability),
            )
            .await;
            return;
        }

        let result = self.execute_command(spec, &envelope, client_id, is_admin).await;
        match result {
            Ok(data) => self.respond_success(client_id, &envelope, data).await,
            Err(err) => {
                self.respond_error_code(client_id, Some(&envelope.id), &err.code, &err.message)
                    .await;
            }
        }
    }

    async fn execute_command(
        &self,
        spec: &CommandSpec,
        envelope: &Envelope,
        client_id: &str,
        is_admin: bool,
    ) -> CommandResult {
        let args = &envelope.args;
        match spec.name {
            "op.store.set" => self.cmd_store_set(args, client_id, is_admin).await,
            "op.store.get" => self.cmd_store_get(args, client_id, is_admin).await,
            "op.store.list" => self.cmd_store_list(args, client_id, is_admin).await,
            "op.store.delete" => self.cmd_store_delete(args, client_id, is_admin).await,
            "op.webhook.register" => self.cmd_webhook_register(args, client_id).await,
            "op.webhook.list" => self.cmd_webhook_list(client_id).await,
            "op.webhook.unregister" => self.cmd_webhook_unregister(args, client_id, is_admin).await,
            "op.cron.schedule" => self.cmd_cron_schedule(args, client_id).await,
            "op.cron.cancel" => self.cmd_cron_cancel(args).await,
            "op.history.get" | "history.get" => self.cmd_history_get(args, is_admin).await,
            "op.history.replay" => self.cmd_history_replay(args, is_admin).await,
            "op.casil.reload" => self.cmd_casil_reload(args).await,
            "op.casil.get" => self.cmd_casil_get().await,
            "op.omega.status" => self.cmd_omega_status().await,
            "op.omega.list_events" => self.cmd_omega_list_events(args).await,
            "op.omega.register_substrate" => self.cmd_omega_register(args, is_admin).await,
            "op.omega.emit_event" => self.cmd_omega_emit(args, is_admin).await,
            "room.join" => self.cmd_room_join(args, client_id).await,
            "room.leave" => self.cmd_room_leave(args, client_id).await,
            "room.create" => self.cmd_room_create(args).await,
            "channel.create" => self.cmd_channel_create(args).await,
            "status" => self.cmd_status().await,
            "op.dispatch" => self.cmd_dispatch(args, client_id).await,
            "op.operator.register" => self.cmd_operator_register(args, client_id).await,
            "op.operator.unregister" => self.cmd_operator_unregister(args, client_id).await,
            other => Err(CommandError::validation(format!("unknown command: {other}"))),
        }
    }
}
