// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! arq-storage
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Bounded in-memory backend.
pub mod memory;
/// No-op backend for degraded mode.
pub mod noop;
/// Named backend factories.
pub mod registry;

pub use memory::MemoryStorageBackend;
pub use noop::NoopStorageBackend;
pub use registry::{StorageConfig, StorageMode, StorageRegistry};

use std::collections::BTreeMap;
use std::sync::Arc;

use arq_core::Envelope;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors surfaced by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend cannot be created (missing prerequisites in strict mode).
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    /// An append or read failed inside the backend.
    #[error("storage operation failed: {0}")]
    Backend(String),

    /// Strict replay found a non-monotonic `metadata.sequence`.
    #[error("Sequence regression in replay window: {previous} -> {current}")]
    SequenceRegression {
        /// Sequence of the previous entry in the window.
        previous: u64,
        /// Offending (smaller) sequence.
        current: u64,
    },

    /// The requested backend name is not registered.
    #[error("unknown storage backend: {0}")]
    UnknownBackend(String),
}

/// Outcome of a single mutation.
#[derive(Debug, Clone)]
pub struct StorageResult {
    /// Whether the mutation took effect.
    pub success: bool,
    /// Id of the affected envelope, when applicable.
    pub message_id: Option<String>,
    /// Backend-side completion time.
    pub timestamp: DateTime<Utc>,
    /// Failure detail when `success` is false.
    pub error: Option<String>,
}

impl StorageResult {
    /// Successful result for `message_id`.
    #[must_use]
    pub fn ok(message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: Some(message_id.into()),
            timestamp: Utc::now(),
            error: None,
        }
    }

    /// Failed result carrying `error`.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            timestamp: Utc::now(),
            error: Some(error.into()),
        }
    }
}

/// One persisted envelope plus the denormalized columns replay sorts on.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// The stored envelope.
    pub envelope: Envelope,
    /// Denormalized room.
    pub room: Option<String>,
    /// Denormalized channel.
    pub channel: Option<String>,
    /// Envelope timestamp, the replay sort key.
    pub timestamp: DateTime<Utc>,
    /// Denormalized `metadata.sequence`.
    pub sequence: Option<u64>,
}

impl HistoryEntry {
    /// Build an entry from an envelope, denormalizing the sort columns.
    #[must_use]
    pub fn from_envelope(envelope: Envelope) -> Self {
        Self {
            room: envelope.room.clone(),
            channel: envelope.channel.clone(),
            timestamp: envelope.timestamp,
            sequence: envelope.sequence(),
            envelope,
        }
    }
}

/// Filter for history reads.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    /// Restrict to a room.
    pub room: Option<String>,
    /// Restrict to a channel.
    pub channel: Option<String>,
    /// Maximum entries returned.
    pub limit: usize,
    /// Inclusive lower timestamp bound.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper timestamp bound.
    pub until: Option<DateTime<Utc>>,
}

impl HistoryQuery {
    /// Whether `entry` passes the room/channel/time filters.
    #[must_use]
    pub fn matches(&self, entry: &HistoryEntry) -> bool {
        if let Some(room) = &self.room
            && entry.room.as_deref() != Some(room.as_str())
        {
            return false;
        }
        if let Some(channel) = &self.channel
            && entry.channel.as_deref() != Some(channel.as_str())
        {
            return false;
        }
        if let Some(since) = self.since
            && entry.timestamp < since
        {
            return false;
        }
        if let Some(until) = self.until
            && entry.timestamp > until
        {
            return false;
        }
        true
    }
}

/// The backend contract. One implementation per storage engine.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Persist one envelope.
    async fn append(&self, envelope: &Envelope) -> Result<StorageResult, StorageError>;

    /// Filtered history, newest-last, at most `query.limit` entries.
    async fn get_history(&self, query: &HistoryQuery) -> Result<Vec<HistoryEntry>, StorageError>;

    /// Windowed replay ordered by timestamp. With `strict_sequence`, a
    /// regression of `metadata.sequence` across the returned window fails
    /// with [`StorageError::SequenceRegression`].
    async fn get_history_replay(
        &self,
        room: Option<&str>,
        channel: Option<&str>,
        from_ts: DateTime<Utc>,
        to_ts: DateTime<Utc>,
        limit: usize,
        strict_sequence: bool,
    ) -> Result<Vec<HistoryEntry>, StorageError> {
        let query = HistoryQuery {
            room: room.map(str::to_string),
            channel: channel.map(str::to_string),
            limit,
            since: Some(from_ts),
            until: Some(to_ts),
        };
        let mut entries = self.get_history(&query).await?;
        entries.sort_by_key(|e| e.timestamp);

        if strict_sequence {
            check_sequence_monotonic(&entries)?;
        }
        Ok(entries)
    }

    /// Delete one envelope by id.
    async fn delete_message(&self, message_id: &str) -> Result<StorageResult, StorageError>;

    /// Delete matching history (all of it when the query is empty).
    async fn clear_history(&self, query: &HistoryQuery) -> Result<StorageResult, StorageError>;

    /// Backend statistics for the status surfaces.
    async fn get_stats(&self) -> BTreeMap<String, serde_json::Value>;

    /// Liveness of the backend.
    async fn health_check(&self) -> bool;

    /// Release backend resources.
    async fn close(&self);
}

/// Verify that `metadata.sequence` never decreases across a replay window.
///
/// # Errors
///
/// Returns [`StorageError::SequenceRegression`] on the first violation.
pub fn check_sequence_monotonic(entries: &[HistoryEntry]) -> Result<(), StorageError> {
    let mut previous: Option<u64> = None;
    for entry in entries {
        let Some(sequence) = entry.sequence else {
            continue;
        };
        if let Some(prev) = previous
            && sequence < prev
        {
            return Err(StorageError::SequenceRegression {
                previous: prev,
                current: sequence,
            });
        }
        previous = Some(sequence);
    }
    Ok(())
}

/// Facade the bus and command lane consume. Owns the backend handle and
/// the ergonomic call surface.
#[derive(Clone)]
pub struct MessageStorage {
    backend: Arc<dyn StorageBackend>,
}

impl MessageStorage {
    /// Wrap a backend.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Persist one envelope.
    ///
    /// # Errors
    ///
    /// Propagates the backend error.
    pub async fn store_message(&self, envelope: &Envelope) -> Result<StorageResult, StorageError> {
        self.backend.append(envelope).await
    }

    /// Filtered history.
    ///
    /// # Errors
    ///
    /// Propagates the backend error.
    pub async fn get_history(
        &self,
        query: &HistoryQuery,
    ) -> Result<Vec<HistoryEntry>, StorageError> {
        self.backend.get_history(query).await
    }

    /// Windowed replay; see [`StorageBackend::get_history_replay`].
    ///
    /// # Errors
    ///
    /// Propagates the backend error, including sequence regressions.
    #[allow(clippy::too_many_arguments)]
    pub async fn get_history_replay(
        &self,
        room: Option<&str>,
        channel: Option<&str>,
        from_ts: DateTime<Utc>,
        to_ts: DateTime<Utc>,
        limit: usize,
        strict_sequence: bool,
    ) -> Result<Vec<HistoryEntry>, StorageError> {
        self.backend
            .get_history_replay(room, channel, from_ts, to_ts, limit, strict_sequence)
            .await
    }

    /// Delete one envelope by id.
    ///
    /// # Errors
    ///
    /// Propagates the backend error.
    pub async fn delete_message(&self, message_id: &str) -> Result<StorageResult, StorageError> {
        self.backend.delete_message(message_id).await
    }

    /// Delete matching history.
    ///
    /// # Errors
    ///
    /// Propagates the backend error.
    pub async fn clear_history(&self, query: &HistoryQuery) -> Result<StorageResult, StorageError> {
        self.backend.clear_history(query).await
    }

    /// Backend statistics.
    pub async fn get_stats(&self) -> BTreeMap<String, serde_json::Value> {
        self.backend.get_stats().await
    }

    /// Backend liveness.
    pub async fn health_check(&self) -> bool {
        self.backend.health_check().await
    }

    /// Release the backend.
    pub async fn close(&self) {
        self.backend.close().await;
    }
}

impl std::fmt::Debug for MessageStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStorage").finish_non_exhaustive()
    }
}
