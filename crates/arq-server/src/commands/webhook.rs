// SPDX-License-Identifier: MIT OR Apache-2.0
//! `op.webhook.*` — webhook rule management.

use arq_core::JsonMap;
use serde_json::json;

use super::{CommandResult, optional_str, required_str};
use crate::bus::SocketBus;

impl SocketBus {
    pub(crate) async fn cmd_webhook_register(
        &self,
        args: &JsonMap,
        client_id: &str,
    ) -> CommandResult {
        let url = required_str(args, "url")?;
        let room = optional_str(args, "room").unwrap_or("*");
        let channel = optional_str(args, "channel").unwrap_or("*");
        let tenant = self.tenant_of(client_id).await;

        let rule_id = self
            .core()
            .webhooks
            .register(url, room, channel, &tenant, client_id)
            .await;
        Ok(json!({ "rule_id": rule_id, "room": room, "channel": channel }))
    }

    pub(crate) async fn cmd_webhook_list(&self, client_id: &str) -> CommandResult {
        let tenant = self.tenant_of(client_id).await;
        let rules = self.core().webhooks.list(&tenant).await;
        Ok(json!({ "count": rules.len(), "rules": rules }))
    }

    pub(crate) async fn cmd_webhook_unregister(
        &self,
        args: &JsonMap,
        client_id: &str,
        is_admin: bool,
    ) -> CommandResult {
        let rule_id = required_str(args, "rule_id")?;
        let tenant = self.tenant_of(client_id).await;
        let removed = self
            .core()
            .webhooks
            .unregister(rule_id, &tenant, is_admin)
            .await;
        Ok(json!({ "removed": removed }))
    }
}
