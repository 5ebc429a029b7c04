// SPDX-License-Identifier: MIT OR Apache-2.0
//! No-op backend used when a configured engine is unavailable and the
//! deployment runs in degraded storage mode.

use std::collections::BTreeMap;

use arq_core::Envelope;
use async_trait::async_trait;
use serde_json::json;

use crate::{HistoryEntry, HistoryQuery, StorageBackend, StorageError, StorageResult};

/// Accepts every append and remembers nothing. `health_check` reports
/// false so status surfaces show the degradation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStorageBackend;

#[async_trait]
impl StorageBackend for NoopStorageBackend {
    async fn append(&self, envelope: &Envelope) -> Result<StorageResult, StorageError> {
        Ok(StorageResult::ok(envelope.id.clone()))
    }

    async fn get_history(&self, _query: &HistoryQuery) -> Result<Vec<HistoryEntry>, StorageError> {
        Ok(Vec::new())
    }

    async fn delete_message(&self, message_id: &str) -> Result<StorageResult, StorageError> {
        Ok(StorageResult::failed(format!(
            "degraded storage retains nothing to delete: {message_id}"
        )))
    }

    async fn clear_history(&self, _query: &HistoryQuery) -> Result<StorageResult, StorageError> {
        Ok(StorageResult {
            success: true,
            message_id: None,
            timestamp: chrono::Utc::now(),
            error: None,
        })
    }

    async fn get_stats(&self) -> BTreeMap<String, serde_json::Value> {
        BTreeMap::from([
            ("backend".to_string(), json!("noop")),
            ("entries".to_string(), json!(0)),
        ])
    }

    async fn health_check(&self) -> bool {
        false
    }

    async fn close(&self) {}
}
