// SPDX-License-Identifier: MIT OR Apache-2.0
//! `op.history.*` — windowed history and strict replay.

use arq_core::JsonMap;
use arq_storage::{HistoryEntry, HistoryQuery};
use serde_json::{Value, json};

use super::{
    CommandError, CommandResult, optional_bool, optional_str, optional_timestamp, optional_u64,
    required_timestamp,
};
use crate::bus::SocketBus;

const DEFAULT_HISTORY_LIMIT: u64 = 100;

fn entry_to_value(entry: &HistoryEntry) -> Value {
    json!({
        "envelope": entry.envelope,
        "room": entry.room,
        "channel": entry.channel,
        "timestamp": entry.timestamp.to_rfc3339(),
        "sequence": entry.sequence,
    })
}

impl SocketBus {
    fn history_storage(&self) -> Result<&arq_storage::MessageStorage, CommandError> {
        self.core()
            .storage
            .as_ref()
            .ok_or_else(|| CommandError::feature_disabled("history persistence is disabled"))
    }

    fn history_room(args: &JsonMap, is_admin: bool) -> Result<Option<String>, CommandError> {
        match optional_str(args, "room") {
            Some(room) => Ok(Some(room.to_string())),
            None if is_admin => Ok(None),
            None => Err(CommandError::authorization(
                "room is required for non-admin history access",
            )),
        }
    }

    pub(crate) async fn cmd_history_get(&self, args: &JsonMap, is_admin: bool) -> CommandResult {
        let storage = self.history_storage()?;
        let room = Self::history_room(args, is_admin)?;

        let query = HistoryQuery {
            room,
            channel: optional_str(args, "channel").map(str::to_string),
            limit: optional_u64(args, "limit").unwrap_or(DEFAULT_HISTORY_LIMIT) as usize,
            since: optional_timestamp(args, "since")?,
            until: optional_timestamp(args, "until")?,
        };

        let entries = storage
            .get_history(&query)
            .await
            .map_err(|e| CommandError::validation(e.to_string()))?;
        let serialized: Vec<Value> = entries.iter().map(entry_to_value).collect();
        Ok(json!({ "count": serialized.len(), "entries": serialized }))
    }

    pub(crate) async fn cmd_history_replay(&self, args: &JsonMap, is_admin: bool) -> CommandResult {
        let storage = self.history_storage()?;
        let room = Self::history_room(args, is_admin)?;
        let from_ts = required_timestamp(args, "from_ts")?;
        let to_ts = required_timestamp(args, "to_ts")?;
        let strict_sequence = optional_bool(args, "strict_sequence").unwrap_or(false);
        let limit = optional_u64(args, "limit").unwrap_or(DEFAULT_HISTORY_LIMIT) as usize;

        let entries = storage
            .get_history_replay(
                room.as_deref(),
                optional_str(args, "channel"),
                from_ts,
                to_ts,
                limit,
                strict_sequence,
            )
            .await
            .map_err(|e| CommandError::validation(e.to_string()))?;

        let serialized: Vec<Value> = entries.iter().map(entry_to_value).collect();
        Ok(json!({
            "count": serialized.len(),
            "entries": serialized,
            "strict_sequence": strict_sequence,
        }))
    }
}
