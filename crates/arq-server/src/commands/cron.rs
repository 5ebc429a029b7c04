// SPDX-License-Identifier: MIT OR Apache-2.0
//! `op.cron.*` — delayed one-shot messages.

use std::time::Duration;

use arq_core::{EnvelopeBuilder, EnvelopeType, JsonMap, metadata_keys};
use serde_json::json;

use super::{CommandError, CommandResult, optional_object, required_str};
use crate::bus::SocketBus;

impl SocketBus {
    pub(crate) async fn cmd_cron_schedule(
        &self,
        args: &JsonMap,
        client_id: &str,
    ) -> CommandResult {
        let room = required_str(args, "room")?.to_string();
        let channel = required_str(args, "channel")?.to_string();
        let payload = optional_object(args, "payload");
        let delay_seconds = args
            .get("delay_seconds")
            .and_then(serde_json::Value::as_f64)
            .ok_or_else(|| CommandError::validation("missing required argument: delay_seconds"))?;
        if !delay_seconds.is_finite() || delay_seconds < 0.0 {
            return Err(CommandError::validation(
                "delay_seconds must be a non-negative number",
            ));
        }

        let tenant = self.tenant_of(client_id).await;
        let bus = self.clone();
        let job_id = self
            .core()
            .cron
            .schedule(
                &room,
                &channel,
                payload,
                &tenant,
                Duration::from_secs_f64(delay_seconds),
                move |job| async move {
                    let envelope = EnvelopeBuilder::new(EnvelopeType::Message)
                        .room(job.room.clone())
                        .channel(job.channel.clone())
                        .payload(job.payload.clone())
                        .metadata_entry(metadata_keys::CRON_JOB_ID, json!(job.job_id))
                        .metadata_entry(metadata_keys::TENANT_ID, json!(job.tenant_id))
                        .build();
                    bus.handle_message(envelope, "cron").await;
                },
            )
            .await;

        let fire_at = self
            .core()
            .cron
            .jobs()
            .await
            .into_iter()
            .find(|j| j.job_id == job_id)
            .map(|j| j.fire_at.to_rfc3339());

        Ok(json!({ "job_id": job_id, "room": room, "channel": channel, "fire_at": fire_at }))
    }

    pub(crate) async fn cmd_cron_cancel(&self, args: &JsonMap) -> CommandResult {
        let job_id = required_str(args, "job_id")?;
        let cancelled = self.core().cron.cancel(job_id).await;
        Ok(json!({ "cancelled": cancelled, "job_id": job_id }))
    }
}
