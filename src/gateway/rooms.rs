use std::collections::HashMap;

use tokio::sync::{Mutex, mpsc};
use tracing::debug;
use uuid::Uuid;

use super::protocol::ServerEvent;

/// Ephemeral broadcast groups, one per conversation.
///
/// Membership is the set of currently subscribed live connections; join and
/// leave mutate it and broadcast iterates it. Nothing here is persisted.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<Uuid, HashMap<String, mpsc::Sender<ServerEvent>>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn join(
        &self,
        conversation_id: Uuid,
        user_id: &str,
        sender: mpsc::Sender<ServerEvent>,
    ) {
        let mut rooms = self.rooms.lock().await;
        rooms
            .entry(conversation_id)
            .or_default()
            .insert(user_id.to_string(), sender);
        debug!("user {user_id} joined room {conversation_id}");
    }

    pub async fn leave(&self, conversation_id: Uuid, user_id: &str) {
        let mut rooms = self.rooms.lock().await;
        if let Some(members) = rooms.get_mut(&conversation_id) {
            members.remove(user_id);
            if members.is_empty() {
                rooms.remove(&conversation_id);
            }
        }
    }

    /// Drops the user from every room, used on disconnect.
    pub async fn leave_all(&self, user_id: &str) {
        let mut rooms = self.rooms.lock().await;
        for members in rooms.values_mut() {
            members.remove(user_id);
        }
        rooms.retain(|_, members| !members.is_empty());
    }

    pub async fn broadcast(&self, conversation_id: Uuid, event: ServerEvent) {
        self.send_to_members(conversation_id, None, event).await;
    }

    /// Broadcast that skips one member, used for typing indicators.
    pub async fn broadcast_except(
        &self,
        conversation_id: Uuid,
        skip_user_id: &str,
        event: ServerEvent,
    ) {
        self.send_to_members(conversation_id, Some(skip_user_id), event)
            .await;
    }

    async fn send_to_members(
        &self,
        conversation_id: Uuid,
        skip_user_id: Option<&str>,
        event: ServerEvent,
    ) {
        let rooms = self.rooms.lock().await;
        let Some(members) = rooms.get(&conversation_id) else {
            return;
        };

        for (member_id, sender) in members {
            if skip_user_id == Some(member_id.as_str()) {
                continue;
            }
            match sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("member {member_id} queue full in {conversation_id}, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("member {member_id} channel closed in {conversation_id}");
                }
            }
        }
    }

    /// Evicts members whose connections have gone away. Run on the same
    /// interval as the presence sweep.
    pub async fn prune_closed(&self) {
        let mut rooms = self.rooms.lock().await;
        for (room_id, members) in rooms.iter_mut() {
            let before = members.len();
            members.retain(|_, sender| !sender.is_closed());
            let dropped = before - members.len();
            if dropped > 0 {
                debug!("pruned {dropped} stale members from {room_id}");
            }
        }
        rooms.retain(|_, members| !members.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_all_members() {
        let rooms = RoomRegistry::new();
        let room = Uuid::new_v4();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);

        rooms.join(room, "alice", tx_a).await;
        rooms.join(room, "bob", tx_b).await;

        rooms.broadcast(room, ServerEvent::error("hello")).await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn broadcast_except_skips_the_named_member() {
        let rooms = RoomRegistry::new();
        let room = Uuid::new_v4();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);

        rooms.join(room, "alice", tx_a).await;
        rooms.join(room, "bob", tx_b).await;

        rooms
            .broadcast_except(room, "alice", ServerEvent::error("typing"))
            .await;

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn events_stop_after_leaving() {
        let rooms = RoomRegistry::new();
        let room = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(8);

        rooms.join(room, "alice", tx).await;
        rooms.leave(room, "alice").await;
        rooms.broadcast(room, ServerEvent::error("gone")).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn leave_all_covers_every_room() {
        let rooms = RoomRegistry::new();
        let room_a = Uuid::new_v4();
        let room_b = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(8);

        rooms.join(room_a, "alice", tx.clone()).await;
        rooms.join(room_b, "alice", tx).await;
        rooms.leave_all("alice").await;

        rooms.broadcast(room_a, ServerEvent::error("a")).await;
        rooms.broadcast(room_b, ServerEvent::error("b")).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn prune_drops_closed_connections() {
        let rooms = RoomRegistry::new();
        let room = Uuid::new_v4();
        let (tx_open, mut rx_open) = mpsc::channel(8);
        let (tx_closed, rx_closed) = mpsc::channel(8);

        rooms.join(room, "alice", tx_open).await;
        rooms.join(room, "bob", tx_closed).await;
        drop(rx_closed);

        rooms.prune_closed().await;
        rooms.broadcast(room, ServerEvent::error("still here")).await;

        assert!(rx_open.try_recv().is_ok());
    }
}
