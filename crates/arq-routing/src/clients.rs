// SPDX-License-Identifier: MIT OR Apache-2.0
//! Client identity and fan-out writes.
//!
//! Each connected client owns an unbounded outbound queue drained by its
//! connection task; the registry only ever clones frames into queues, so a
//! slow client cannot stall a broadcast.

use std::collections::{HashMap, HashSet};

use arq_core::JsonMap;
use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

/// A frame ready to write to a socket.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    /// JSON text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

struct ClientEntry {
    metadata: JsonMap,
    memberships: HashSet<(String, String)>,
    last_activity: DateTime<Utc>,
    sender: mpsc::UnboundedSender<OutboundFrame>,
}

/// Snapshot of one client, safe to hand across the command lane.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    /// Server-assigned id.
    pub client_id: String,
    /// Role, tenant, permissions, and anything else attached at accept.
    pub metadata: JsonMap,
    /// `(room, channel)` memberships.
    pub memberships: HashSet<(String, String)>,
    /// Last frame seen from this client.
    pub last_activity: DateTime<Utc>,
}

/// Registry of connected clients and their memberships.
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, ClientEntry>>,
}

impl ClientRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and assign it a client id.
    pub async fn register_client(
        &self,
        sender: mpsc::UnboundedSender<OutboundFrame>,
        metadata: JsonMap,
    ) -> String {
        let client_id = format!("client_{}", Uuid::new_v4().simple());
        let entry = ClientEntry {
            metadata,
            memberships: HashSet::new(),
            last_activity: Utc::now(),
            sender,
        };
        self.clients.write().await.insert(client_id.clone(), entry);
        debug!(client_id = %client_id, "client registered");
        client_id
    }

    /// Drop a client and release its memberships.
    pub async fn unregister_client(&self, client_id: &str) -> bool {
        self.clients.write().await.remove(client_id).is_some()
    }

    /// Snapshot a client.
    pub async fn get_client(&self, client_id: &str) -> Option<ClientInfo> {
        let clients = self.clients.read().await;
        clients.get(client_id).map(|entry| ClientInfo {
            client_id: client_id.to_string(),
            metadata: entry.metadata.clone(),
            memberships: entry.memberships.clone(),
            last_activity: entry.last_activity,
        })
    }

    /// Number of connected clients.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Refresh the activity timestamp.
    pub async fn update_client_activity(&self, client_id: &str) {
        if let Some(entry) = self.clients.write().await.get_mut(client_id) {
            entry.last_activity = Utc::now();
        }
    }

    /// Merge additional metadata into a client (JWT claims, role changes).
    pub async fn update_client_metadata(&self, client_id: &str, metadata: JsonMap) {
        if let Some(entry) = self.clients.write().await.get_mut(client_id) {
            entry.metadata.extend(metadata);
        }
    }

    /// Add a `(room, channel)` membership.
    pub async fn join_room_channel(&self, client_id: &str, room: &str, channel: &str) -> bool {
        match self.clients.write().await.get_mut(client_id) {
            Some(entry) => {
                entry
                    .memberships
                    .insert((room.to_string(), channel.to_string()));
                true
            }
            None => false,
        }
    }

    /// Remove a `(room, channel)` membership.
    pub async fn leave_room_channel(&self, client_id: &str, room: &str, channel: &str) -> bool {
        match self.clients.write().await.get_mut(client_id) {
            Some(entry) => entry
                .memberships
                .remove(&(room.to_string(), channel.to_string())),
            None => false,
        }
    }

    /// Queue one frame to one client. Returns false when the client is
    /// gone or its connection task has stopped draining.
    pub async fn send_to_client(&self, client_id: &str, frame: OutboundFrame) -> bool {
        let clients = self.clients.read().await;
        match clients.get(client_id) {
            Some(entry) => entry.sender.send(frame).is_ok(),
            None => false,
        }
    }

    /// Fan one frame out to every member of `(room, channel)`, optionally
    /// excluding the sender. Returns the number of clients written to.
    pub async fn broadcast_to_room_channel(
        &self,
        room: &str,
        channel: &str,
        frame: &OutboundFrame,
        exclude_sender: Option<&str>,
    ) -> usize {
        let key = (room.to_string(), channel.to_string());
        let clients = self.clients.read().await;
        let mut delivered = 0;
        for (client_id, entry) in clients.iter() {
            if exclude_sender == Some(client_id.as_str()) {
                continue;
            }
            if entry.memberships.contains(&key) && entry.sender.send(frame.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Members of `(room, channel)`.
    pub async fn members_of(&self, room: &str, channel: &str) -> Vec<String> {
        let key = (room.to_string(), channel.to_string());
        let clients = self.clients.read().await;
        let mut members: Vec<String> = clients
            .iter()
            .filter(|(_, entry)| entry.memberships.contains(&key))
            .map(|(id, _)| id.clone())
            .collect();
        members.sort();
        members
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry").finish_non_exhaustive()
    }
}
