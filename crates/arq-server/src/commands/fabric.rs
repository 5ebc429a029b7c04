// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fabric commands: membership, room/channel creation, status, operator
//! registration, and admin task dispatch.

use arq_core::{EnvelopeBuilder, EnvelopeType, JsonMap, ResponseStatus};
use arq_routing::{DispatchStrategy, SelectionResolution};
use serde_json::json;

use super::{CommandError, CommandResult, optional_bool, optional_object, optional_str, required_str};
use crate::bus::SocketBus;

impl SocketBus {
    pub(crate) async fn cmd_room_join(&self, args: &JsonMap, client_id: &str) -> CommandResult {
        let room = required_str(args, "room")?;
        let channel = optional_str(args, "channel").unwrap_or("general");
        let joined = self
            .core()
            .routing
            .router
            .join_client_to_room_channel(client_id, room, channel)
            .await;
        Ok(json!({ "joined": joined, "room": room, "channel": channel }))
    }

    pub(crate) async fn cmd_room_leave(&self, args: &JsonMap, client_id: &str) -> CommandResult {
        let room = required_str(args, "room")?;
        let channel = optional_str(args, "channel").unwrap_or("general");
        let left = self
            .core()
            .routing
            .router
            .leave_client_from_room_channel(client_id, room, channel)
            .await;
        Ok(json!({ "left": left, "room": room, "channel": channel }))
    }

    pub(crate) async fn cmd_room_create(&self, args: &JsonMap) -> CommandResult {
        let room = required_str(args, "room")?;
        let created = self.core().routing.room_manager.create_room(room).await;
        Ok(json!({ "created": created, "room": room }))
    }

    pub(crate) async fn cmd_channel_create(&self, args: &JsonMap) -> CommandResult {
        let room = required_str(args, "room")?;
        let channel = required_str(args, "channel")?;
        self.core().routing.room_manager.add_channel(room, channel).await;
        let created = self
            .core()
            .routing
            .channel_manager
            .create_channel(room, channel)
            .await;
        Ok(json!({ "created": created, "room": room, "channel": channel }))
    }

    pub(crate) async fn cmd_status(&self) -> CommandResult {
        let core = self.core();
        let uptime = (chrono::Utc::now() - core.started_at).num_seconds().max(0);
        let storage_healthy = match &core.storage {
            Some(storage) => Some(storage.health_check().await),
            None => None,
        };
        Ok(json!({
            "service": "arqonbus",
            "clients": core.routing.client_registry.client_count().await,
            "rooms": core.routing.room_manager.room_count().await,
            "capabilities": core.operators.capabilities().await,
            "uptime_seconds": uptime,
            "storage_healthy": storage_healthy,
        }))
    }

    pub(crate) async fn cmd_operator_register(
        &self,
        args: &JsonMap,
        client_id: &str,
    ) -> CommandResult {
        let capability = required_str(args, "capability")?;
        let token = optional_str(args, "auth_token");
        let registered = self
            .core()
            .operators
            .register_operator(client_id, capability, token)
            .await;
        if registered {
            Ok(json!({ "registered": true, "capability": capability }))
        } else {
            Err(CommandError::authorization("operator registration denied"))
        }
    }

    pub(crate) async fn cmd_operator_unregister(
        &self,
        args: &JsonMap,
        client_id: &str,
    ) -> CommandResult {
        let capability = required_str(args, "capability")?;
        let removed = self
            .core()
            .operators
            .unregister_operator(client_id, capability)
            .await;
        Ok(json!({ "removed": removed, "capability": capability }))
    }

    pub(crate) async fn cmd_dispatch(&self, args: &JsonMap, client_id: &str) -> CommandResult {
        let capability = required_str(args, "capability")?;
        let strategy = match optional_str(args, "strategy") {
            None => DispatchStrategy::RoundRobin,
            Some(raw) => DispatchStrategy::parse(raw)
                .ok_or_else(|| CommandError::validation(format!("invalid strategy: {raw}")))?,
        };
        let payload = optional_object(args, "payload");
        let want_future = optional_bool(args, "return_selection_future").unwrap_or(false);

        let task = EnvelopeBuilder::new(EnvelopeType::Command)
            .sender(client_id)
            .command("op.task.execute")
            .payload(payload)
            .build();
        let task_id = task.id.clone();

        if want_future {
            if strategy != DispatchStrategy::Competing {
                return Err(CommandError::validation(
                    "return_selection_future requires the competing strategy",
                ));
            }
            let operators = self.core().operators.get_operators(capability).await;
            if operators.is_empty() {
                return Err(CommandError::validation(format!(
                    "no operators registered for capability {capability}"
                )));
            }

            let future = self
                .core()
                .dispatcher
                .dispatch_task_with_future(&task, capability)
                .await;

            // Resolve out of band: the caller gets the winner as an
            // operator_result correlated by task id.
            let bus = self.clone();
            let caller = client_id.to_string();
            let resolved_task_id = task_id.clone();
            tokio::spawn(async move {
                let Some(resolution) = future.resolve().await else {
                    return;
                };
                let payload_entry = match resolution {
                    SelectionResolution::Winner(winner) => json!({ "selection": winner }),
                    SelectionResolution::Results(results) => json!({
                        "selection": null,
                        "results_collected": results.len(),
                    }),
                };
                let result = EnvelopeBuilder::new(EnvelopeType::OperatorResult)
                    .sender("dispatcher")
                    .request_id(resolved_task_id)
                    .status(ResponseStatus::Success)
                    .payload_entry("dispatch", payload_entry)
                    .build();
                bus.send_envelope(&caller, &result).await;
            });

            Ok(json!({
                "task_id": task_id,
                "pending": true,
                "operators": operators.len(),
            }))
        } else {
            let delivered = self
                .core()
                .dispatcher
                .dispatch_task(&task, capability, strategy)
                .await;
            Ok(json!({ "task_id": task_id, "delivered": delivered }))
        }
    }
}
