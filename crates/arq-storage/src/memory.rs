// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bounded in-memory storage backend.

use std::collections::{BTreeMap, VecDeque};

use arq_core::Envelope;
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::RwLock;

use crate::{HistoryEntry, HistoryQuery, StorageBackend, StorageError, StorageResult};

const DEFAULT_MAX_SIZE: usize = 10_000;

/// Ring-buffered backend: the oldest entry is evicted once `max_size` is
/// reached. The default backend for local and test deployments.
#[derive(Debug)]
pub struct MemoryStorageBackend {
    entries: RwLock<VecDeque<HistoryEntry>>,
    max_size: usize,
}

impl MemoryStorageBackend {
    /// Backend retaining at most `max_size` envelopes.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            max_size: max_size.max(1),
        }
    }

    /// Number of retained entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether nothing is retained.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for MemoryStorageBackend {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE)
    }
}

#[async_trait]
impl StorageBackend for MemoryStorageBackend {
    async fn append(&self, envelope: &Envelope) -> Result<StorageResult, StorageError> {
        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_size {
            entries.pop_front();
        }
        entries.push_back(HistoryEntry::from_envelope(envelope.clone()));
        Ok(StorageResult::ok(envelope.id.clone()))
    }

    async fn get_history(&self, query: &HistoryQuery) -> Result<Vec<HistoryEntry>, StorageError> {
        let entries = self.entries.read().await;
        let limit = if query.limit == 0 { usize::MAX } else { query.limit };
        Ok(entries
            .iter()
            .filter(|e| query.matches(e))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_message(&self, message_id: &str) -> Result<StorageResult, StorageError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.envelope.id != message_id);
        if entries.len() < before {
            Ok(StorageResult::ok(message_id))
        } else {
            Ok(StorageResult::failed(format!("message not found: {message_id}")))
        }
    }

    async fn clear_history(&self, query: &HistoryQuery) -> Result<StorageResult, StorageError> {
        let mut entries = self.entries.write().await;
        entries.retain(|e| !query.matches(e));
        Ok(StorageResult {
            success: true,
            message_id: None,
            timestamp: chrono::Utc::now(),
            error: None,
        })
    }

    async fn get_stats(&self) -> BTreeMap<String, serde_json::Value> {
        let entries = self.entries.read().await;
        BTreeMap::from([
            ("backend".to_string(), json!("memory")),
            ("entries".to_string(), json!(entries.len())),
            ("max_size".to_string(), json!(self.max_size)),
        ])
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use arq_core::{EnvelopeType, JsonMap};
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn stored(idx: u64, sequence: u64, base: chrono::DateTime<Utc>) -> Envelope {
        Envelope::builder(EnvelopeType::Message)
            .id(format!("arq_1700000000000000000_{idx}_c0ffee"))
            .timestamp(base + Duration::seconds(idx as i64))
            .room("ops")
            .channel("events")
            .payload_entry("idx", json!(idx))
            .metadata_entry("sequence", json!(sequence))
            .build()
    }

    #[tokio::test]
    async fn replay_returns_chronological_window() {
        let backend = MemoryStorageBackend::new(100);
        let base = Utc::now();
        for idx in [2u64, 1, 3] {
            backend.append(&stored(idx, idx, base)).await.unwrap();
        }

        let replay = backend
            .get_history_replay(
                Some("ops"),
                Some("events"),
                base,
                base + Duration::seconds(10),
                50,
                true,
            )
            .await
            .unwrap();

        let order: Vec<u64> = replay
            .iter()
            .map(|e| e.envelope.payload.get("idx").and_then(|v| v.as_u64()).unwrap())
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn strict_replay_detects_sequence_regression() {
        let backend = MemoryStorageBackend::new(100);
        let base = Utc::now();
        // Later timestamp carries the smaller sequence.
        backend.append(&stored(1, 2, base)).await.unwrap();
        backend.append(&stored(2, 1, base)).await.unwrap();

        let err = backend
            .get_history_replay(Some("ops"), Some("events"), base, base + Duration::seconds(10), 50, true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Sequence regression"));
    }

    #[tokio::test]
    async fn non_strict_replay_tolerates_regression() {
        let backend = MemoryStorageBackend::new(100);
        let base = Utc::now();
        backend.append(&stored(1, 2, base)).await.unwrap();
        backend.append(&stored(2, 1, base)).await.unwrap();

        let replay = backend
            .get_history_replay(Some("ops"), None, base, base + Duration::seconds(10), 50, false)
            .await
            .unwrap();
        assert_eq!(replay.len(), 2);
    }

    #[tokio::test]
    async fn ring_evicts_oldest_at_capacity() {
        let backend = MemoryStorageBackend::new(2);
        let base = Utc::now();
        for idx in 1..=3u64 {
            backend.append(&stored(idx, idx, base)).await.unwrap();
        }
        assert_eq!(backend.len().await, 2);

        let all = backend.get_history(&HistoryQuery::default()).await.unwrap();
        let ids: Vec<u64> = all.iter().filter_map(|e| e.sequence).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn delete_removes_by_id() {
        let backend = MemoryStorageBackend::new(10);
        let env = stored(1, 1, Utc::now());
        backend.append(&env).await.unwrap();

        let result = backend.delete_message(&env.id).await.unwrap();
        assert!(result.success);
        assert!(backend.is_empty().await);

        let missing = backend.delete_message(&env.id).await.unwrap();
        assert!(!missing.success);
    }

    #[tokio::test]
    async fn room_filter_isolates_histories() {
        let backend = MemoryStorageBackend::new(10);
        let base = Utc::now();
        backend.append(&stored(1, 1, base)).await.unwrap();
        let mut other = stored(2, 2, base);
        other.room = Some("science".to_string());
        backend.append(&other).await.unwrap();

        let ops_only = backend
            .get_history(&HistoryQuery {
                room: Some("ops".to_string()),
                ..HistoryQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(ops_only.len(), 1);
        assert_eq!(ops_only[0].room.as_deref(), Some("ops"));
    }
}
