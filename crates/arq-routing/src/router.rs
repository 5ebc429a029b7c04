// SPDX-License-Identifier: MIT OR Apache-2.0
//! Join/leave coordination and message routing.

use std::sync::Arc;

use arq_core::Envelope;
use arq_wire::WireFormat;
use async_trait::async_trait;
use tracing::debug;

use crate::clients::ClientRegistry;
use crate::dispatcher::DirectRouter;
use crate::encode_frame;
use crate::rooms::{ChannelManager, RoomManager};

/// Routes envelopes onto the fabric in a fixed wire format.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    registry: Arc<ClientRegistry>,
    rooms: Arc<RoomManager>,
    channels: Arc<ChannelManager>,
    wire_format: WireFormat,
}

impl MessageRouter {
    /// Router writing frames in `wire_format`.
    #[must_use]
    pub fn new(
        registry: Arc<ClientRegistry>,
        rooms: Arc<RoomManager>,
        channels: Arc<ChannelManager>,
        wire_format: WireFormat,
    ) -> Self {
        Self {
            registry,
            rooms,
            channels,
            wire_format,
        }
    }

    /// The format this router writes.
    #[must_use]
    pub fn wire_format(&self) -> WireFormat {
        self.wire_format
    }

    /// Join a client, lazily creating the room and channel.
    pub async fn join_client_to_room_channel(
        &self,
        client_id: &str,
        room: &str,
        channel: &str,
    ) -> bool {
        self.rooms.ensure_room(room).await;
        self.rooms.add_channel(room, channel).await;
        self.channels.ensure_channel(room, channel).await;
        self.registry.join_room_channel(client_id, room, channel).await
    }

    /// Remove a client from a channel.
    pub async fn leave_client_from_room_channel(
        &self,
        client_id: &str,
        room: &str,
        channel: &str,
    ) -> bool {
        self.registry.leave_room_channel(client_id, room, channel).await
    }

    /// Fan a routed envelope out to its `(room, channel)`, excluding the
    /// sender. Returns the recipient count; 0 when the envelope carries no
    /// routing hints or encoding fails.
    pub async fn route_message(&self, envelope: &Envelope, sender_client_id: &str) -> usize {
        let (Some(room), Some(channel)) = (envelope.room.as_deref(), envelope.channel.as_deref())
        else {
            return 0;
        };
        let Ok(frame) = encode_frame(envelope, self.wire_format) else {
            debug!(envelope_id = %envelope.id, "failed to encode broadcast frame");
            return 0;
        };
        self.registry
            .broadcast_to_room_channel(room, channel, &frame, Some(sender_client_id))
            .await
    }
}

#[async_trait]
impl DirectRouter for MessageRouter {
    async fn route_direct_message(&self, envelope: &Envelope, target_client_id: &str) -> bool {
        let Ok(frame) = encode_frame(envelope, self.wire_format) else {
            return false;
        };
        self.registry.send_to_client(target_client_id, frame).await
    }
}

/// Binds the fabric together: one registry, one pair of managers, one
/// router. The socket bus owns exactly one of these.
#[derive(Debug, Clone)]
pub struct RoutingCoordinator {
    /// Connected clients and memberships.
    pub client_registry: Arc<ClientRegistry>,
    /// Room namespace.
    pub room_manager: Arc<RoomManager>,
    /// Channel namespace.
    pub channel_manager: Arc<ChannelManager>,
    /// Frame router.
    pub router: Arc<MessageRouter>,
}

impl RoutingCoordinator {
    /// Build a coordinator writing frames in `wire_format`.
    #[must_use]
    pub fn new(wire_format: WireFormat) -> Self {
        let client_registry = Arc::new(ClientRegistry::new());
        let room_manager = Arc::new(RoomManager::new());
        let channel_manager = Arc::new(ChannelManager::new());
        let router = Arc::new(MessageRouter::new(
            Arc::clone(&client_registry),
            Arc::clone(&room_manager),
            Arc::clone(&channel_manager),
            wire_format,
        ));
        Self {
            client_registry,
            room_manager,
            channel_manager,
            router,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arq_core::JsonMap;
    use crate::clients::OutboundFrame;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn legacy_broadcast_excludes_sender() {
        let coordinator = RoutingCoordinator::new(WireFormat::Json);

        coordinator.room_manager.create_room("room1").await;
        coordinator.channel_manager.create_channel("room1", "chan1").await;

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let c1 = coordinator.client_registry.register_client(tx1, JsonMap::new()).await;
        let c2 = coordinator.client_registry.register_client(tx2, JsonMap::new()).await;

        coordinator.router.join_client_to_room_channel(&c1, "room1", "chan1").await;
        coordinator.router.join_client_to_room_channel(&c2, "room1", "chan1").await;

        let env = Envelope::builder(arq_core::EnvelopeType::Message)
            .room("room1")
            .channel("chan1")
            .sender(c1.clone())
            .payload_entry("text", json!("hello"))
            .build();

        let sent = coordinator.router.route_message(&env, &c1).await;
        assert_eq!(sent, 1);
        assert!(rx1.try_recv().is_err());

        let Ok(OutboundFrame::Text(raw)) = rx2.try_recv() else {
            panic!("expected a JSON frame");
        };
        let received: Envelope = serde_json::from_str(&raw).unwrap();
        assert_eq!(received.payload.get("text"), Some(&json!("hello")));
    }

    #[tokio::test]
    async fn join_creates_room_and_channel_lazily() {
        let coordinator = RoutingCoordinator::new(WireFormat::Json);
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = coordinator.client_registry.register_client(tx, JsonMap::new()).await;

        assert!(coordinator.router.join_client_to_room_channel(&id, "new-room", "new-chan").await);
        assert!(coordinator.room_manager.get_room("new-room").await.is_some());
        assert!(coordinator.channel_manager.get_channel("new-room", "new-chan").await.is_some());
    }

    #[tokio::test]
    async fn direct_route_reaches_one_client() {
        let coordinator = RoutingCoordinator::new(WireFormat::Protobuf);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = coordinator.client_registry.register_client(tx, JsonMap::new()).await;

        let env = Envelope::command("op.ping", JsonMap::new());
        assert!(coordinator.router.route_direct_message(&env, &id).await);
        assert!(matches!(rx.try_recv(), Ok(OutboundFrame::Binary(_))));
    }
}
