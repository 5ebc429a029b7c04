// SPDX-License-Identifier: MIT OR Apache-2.0
//! Room and channel structure.
//!
//! Managers own the namespace: which rooms exist and which channels live
//! inside them. Membership (who is in a channel) lives in the client
//! registry; only ids cross the boundary in each direction.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// One room: a named set of channels.
#[derive(Debug, Clone)]
pub struct Room {
    /// Room name.
    pub name: String,
    /// Channels created within this room.
    pub channels: BTreeSet<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Authoritative set of rooms.
#[derive(Debug, Default)]
pub struct RoomManager {
    rooms: RwLock<HashMap<String, Room>>,
}

impl RoomManager {
    /// Empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a room eagerly. Returns false if it already existed.
    pub async fn create_room(&self, name: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(name) {
            return false;
        }
        rooms.insert(
            name.to_string(),
            Room {
                name: name.to_string(),
                channels: BTreeSet::new(),
                created_at: Utc::now(),
            },
        );
        true
    }

    /// Create the room if absent (lazy creation on first join).
    pub async fn ensure_room(&self, name: &str) {
        let mut rooms = self.rooms.write().await;
        rooms.entry(name.to_string()).or_insert_with(|| Room {
            name: name.to_string(),
            channels: BTreeSet::new(),
            created_at: Utc::now(),
        });
    }

    /// Record a channel under a room (creating the room if needed).
    pub async fn add_channel(&self, room: &str, channel: &str) {
        let mut rooms = self.rooms.write().await;
        let entry = rooms.entry(room.to_string()).or_insert_with(|| Room {
            name: room.to_string(),
            channels: BTreeSet::new(),
            created_at: Utc::now(),
        });
        entry.channels.insert(channel.to_string());
    }

    /// Snapshot a room.
    pub async fn get_room(&self, name: &str) -> Option<Room> {
        self.rooms.read().await.get(name).cloned()
    }

    /// Sorted room names.
    pub async fn list_rooms(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rooms.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

/// One channel inside a room.
#[derive(Debug, Clone)]
pub struct Channel {
    /// Owning room.
    pub room: String,
    /// Channel name.
    pub name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Authoritative set of channels, keyed by `(room, channel)`.
#[derive(Debug, Default)]
pub struct ChannelManager {
    channels: RwLock<HashMap<(String, String), Channel>>,
}

impl ChannelManager {
    /// Empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a channel eagerly. Returns false if it already existed.
    pub async fn create_channel(&self, room: &str, channel: &str) -> bool {
        let key = (room.to_string(), channel.to_string());
        let mut channels = self.channels.write().await;
        if channels.contains_key(&key) {
            return false;
        }
        channels.insert(
            key,
            Channel {
                room: room.to_string(),
                name: channel.to_string(),
                created_at: Utc::now(),
            },
        );
        true
    }

    /// Create the channel if absent.
    pub async fn ensure_channel(&self, room: &str, channel: &str) {
        let key = (room.to_string(), channel.to_string());
        let mut channels = self.channels.write().await;
        channels.entry(key).or_insert_with(|| Channel {
            room: room.to_string(),
            name: channel.to_string(),
            created_at: Utc::now(),
        });
    }

    /// Snapshot a channel.
    pub async fn get_channel(&self, room: &str, channel: &str) -> Option<Channel> {
        self.channels
            .read()
            .await
            .get(&(room.to_string(), channel.to_string()))
            .cloned()
    }

    /// Sorted channel names within a room.
    pub async fn channels_in_room(&self, room: &str) -> Vec<String> {
        let channels = self.channels.read().await;
        let mut names: Vec<String> = channels
            .keys()
            .filter(|(r, _)| r == room)
            .map(|(_, c)| c.clone())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rooms_create_once() {
        let rooms = RoomManager::new();
        assert!(rooms.create_room("room1").await);
        assert!(!rooms.create_room("room1").await);
        assert_eq!(rooms.room_count().await, 1);
    }

    #[tokio::test]
    async fn channels_attach_to_their_room() {
        let rooms = RoomManager::new();
        let channels = ChannelManager::new();

        rooms.add_channel("room1", "chan1").await;
        channels.ensure_channel("room1", "chan1").await;
        channels.ensure_channel("room1", "chan2").await;
        channels.ensure_channel("room2", "other").await;

        assert_eq!(channels.channels_in_room("room1").await, vec!["chan1", "chan2"]);
        let room = rooms.get_room("room1").await.unwrap();
        assert!(room.channels.contains("chan1"));
    }
}
