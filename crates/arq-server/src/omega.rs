// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tier-Omega lab lane.
//!
//! A feature-gated experiment surface: named substrates emit signals into
//! a bounded ring that admins can inspect. The lane itself always runs on
//! the in-memory substrate table; the firecracker runtime only changes
//! startup validation, not this state machine.

use std::collections::{HashMap, VecDeque};

use arq_core::JsonMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A registered substrate.
#[derive(Debug, Clone, Serialize)]
pub struct Substrate {
    /// Server-assigned id (`sub_…`).
    pub substrate_id: String,
    /// Human-assigned name.
    pub name: String,
    /// Substrate kind (free-form: `relational`, `symbolic`, …).
    pub kind: String,
    /// Registration time.
    pub registered_at: DateTime<Utc>,
}

/// One emitted signal.
#[derive(Debug, Clone, Serialize)]
pub struct OmegaEvent {
    /// Event id.
    pub event_id: String,
    /// Emitting substrate.
    pub substrate_id: String,
    /// Signal name.
    pub signal: String,
    /// Signal payload.
    pub payload: JsonMap,
    /// Emission time.
    pub emitted_at: DateTime<Utc>,
}

/// Errors surfaced to the command lane.
#[derive(Debug, thiserror::Error)]
pub enum OmegaError {
    /// The substrate table is full.
    #[error("substrate capacity reached ({0})")]
    SubstrateCapacity(usize),
    /// Unknown substrate id.
    #[error("unknown substrate: {0}")]
    UnknownSubstrate(String),
}

/// Substrate table plus the bounded event ring.
#[derive(Debug)]
pub struct OmegaLane {
    substrates: RwLock<HashMap<String, Substrate>>,
    events: RwLock<VecDeque<OmegaEvent>>,
    max_events: usize,
    max_substrates: usize,
}

impl OmegaLane {
    /// Lane retaining at most `max_events` events and `max_substrates`
    /// substrates.
    #[must_use]
    pub fn new(max_events: usize, max_substrates: usize) -> Self {
        Self {
            substrates: RwLock::new(HashMap::new()),
            events: RwLock::new(VecDeque::new()),
            max_events: max_events.max(1),
            max_substrates: max_substrates.max(1),
        }
    }

    /// Register a substrate.
    ///
    /// # Errors
    ///
    /// Returns [`OmegaError::SubstrateCapacity`] when the table is full.
    pub async fn register_substrate(&self, name: &str, kind: &str) -> Result<Substrate, OmegaError> {
        let mut substrates = self.substrates.write().await;
        if substrates.len() >= self.max_substrates {
            return Err(OmegaError::SubstrateCapacity(self.max_substrates));
        }
        let substrate = Substrate {
            substrate_id: format!("sub_{}", Uuid::new_v4().simple()),
            name: name.to_string(),
            kind: kind.to_string(),
            registered_at: Utc::now(),
        };
        substrates.insert(substrate.substrate_id.clone(), substrate.clone());
        Ok(substrate)
    }

    /// Emit a signal from a registered substrate into the ring.
    ///
    /// # Errors
    ///
    /// Returns [`OmegaError::UnknownSubstrate`] for unregistered ids.
    pub async fn emit_event(
        &self,
        substrate_id: &str,
        signal: &str,
        payload: JsonMap,
    ) -> Result<OmegaEvent, OmegaError> {
        if !self.substrates.read().await.contains_key(substrate_id) {
            return Err(OmegaError::UnknownSubstrate(substrate_id.to_string()));
        }

        let event = OmegaEvent {
            event_id: format!("oev_{}", Uuid::new_v4().simple()),
            substrate_id: substrate_id.to_string(),
            signal: signal.to_string(),
            payload,
            emitted_at: Utc::now(),
        };

        let mut events = self.events.write().await;
        events.push_back(event.clone());
        while events.len() > self.max_events {
            events.pop_front();
        }
        Ok(event)
    }

    /// The retained event window, oldest first, optionally filtered by
    /// substrate and capped at `limit`.
    pub async fn list_events(&self, substrate_id: Option<&str>, limit: usize) -> Vec<OmegaEvent> {
        let events = self.events.read().await;
        let limit = if limit == 0 { self.max_events } else { limit };
        events
            .iter()
            .filter(|e| substrate_id.is_none_or(|id| e.substrate_id == id))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Registered substrate count.
    pub async fn substrate_count(&self) -> usize {
        self.substrates.read().await.len()
    }

    /// Retained event count.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn ring_retains_latest_events() {
        let lane = OmegaLane::new(2, 16);
        let substrate = lane.register_substrate("alpha", "relational").await.unwrap();

        for idx in 0..3 {
            let mut payload = JsonMap::new();
            payload.insert("idx".to_string(), json!(idx));
            lane.emit_event(&substrate.substrate_id, &format!("pulse-{idx}"), payload)
                .await
                .unwrap();
        }

        let events = lane.list_events(None, 10).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].signal, "pulse-1");
        assert_eq!(events[1].signal, "pulse-2");
    }

    #[tokio::test]
    async fn filter_isolates_substrates() {
        let lane = OmegaLane::new(10, 16);
        let alpha = lane.register_substrate("alpha", "relational").await.unwrap();
        let beta = lane.register_substrate("beta", "symbolic").await.unwrap();

        lane.emit_event(&alpha.substrate_id, "pulse", JsonMap::new()).await.unwrap();
        lane.emit_event(&beta.substrate_id, "pulse", JsonMap::new()).await.unwrap();

        let filtered = lane.list_events(Some(&alpha.substrate_id), 10).await;
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].substrate_id, alpha.substrate_id);
    }

    #[tokio::test]
    async fn unknown_substrate_cannot_emit() {
        let lane = OmegaLane::new(10, 16);
        let err = lane.emit_event("sub_missing", "pulse", JsonMap::new()).await.unwrap_err();
        assert!(matches!(err, OmegaError::UnknownSubstrate(_)));
    }

    #[tokio::test]
    async fn substrate_table_is_capped() {
        let lane = OmegaLane::new(10, 1);
        lane.register_substrate("alpha", "relational").await.unwrap();
        let err = lane.register_substrate("beta", "symbolic").await.unwrap_err();
        assert!(matches!(err, OmegaError::SubstrateCapacity(1)));
    }
}
