use std::collections::HashMap;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::auth::AuthUser;
use crate::gateway::protocol::{OnlineUser, ServerEvent};

/// How often idle entries are swept.
pub const SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(60);

/// Entries idle longer than this are dropped by the sweep.
pub fn idle_threshold() -> Duration {
    Duration::minutes(5)
}

struct PresenceEntry {
    user: AuthUser,
    handle: mpsc::Sender<ServerEvent>,
    status: Option<String>,
    last_seen: DateTime<Utc>,
}

/// Process-wide map of authenticated user to live connection.
///
/// Advisory only: nothing is persisted, and a restart marks everyone
/// offline. Mutated exclusively by the gateway; a multi-instance deployment
/// would swap this for a shared external store.
#[derive(Default)]
pub struct PresenceRegistry {
    entries: Mutex<HashMap<String, PresenceEntry>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a user's entry. Reconnection replaces the previous
    /// connection handle.
    pub async fn register(&self, user: AuthUser, handle: mpsc::Sender<ServerEvent>) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            user.id.clone(),
            PresenceEntry {
                user,
                handle,
                status: None,
                last_seen: Utc::now(),
            },
        );
    }

    /// Refreshes last-seen without touching the handle.
    pub async fn touch(&self, user_id: &str) {
        if let Some(entry) = self.entries.lock().await.get_mut(user_id) {
            entry.last_seen = Utc::now();
        }
    }

    pub async fn unregister(&self, user_id: &str) {
        self.entries.lock().await.remove(user_id);
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.entries.lock().await.contains_key(user_id)
    }

    /// Updates the free-text status. Returns false for unknown users.
    pub async fn set_status(&self, user_id: &str, status: String) -> bool {
        match self.entries.lock().await.get_mut(user_id) {
            Some(entry) => {
                entry.status = Some(status);
                true
            }
            None => false,
        }
    }

    pub async fn snapshot(&self) -> Vec<OnlineUser> {
        self.entries
            .lock()
            .await
            .values()
            .map(|entry| OnlineUser {
                user_id: entry.user.id.clone(),
                name: entry.user.name.clone(),
                avatar: entry.user.avatar.clone(),
                status: entry.status.clone().unwrap_or_else(|| "online".to_string()),
                last_seen: entry.last_seen,
            })
            .collect()
    }

    /// Drops entries whose last-seen precedes `now - idle`. Returns how many
    /// were removed.
    pub async fn sweep(&self, now: DateTime<Utc>, idle: Duration) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| now - entry.last_seen <= idle);
        let removed = before - entries.len();
        if removed > 0 {
            debug!("swept {removed} idle presence entries");
        }
        removed
    }

    /// Pushes an event to every live connection. Full or closed queues drop
    /// the delivery rather than block.
    pub async fn broadcast(&self, event: ServerEvent) {
        for entry in self.entries.lock().await.values() {
            let _ = entry.handle.try_send(event.clone());
        }
    }

    /// Sends the current presence snapshot to everyone.
    pub async fn broadcast_snapshot(&self) {
        let users = self.snapshot().await;
        self.broadcast(ServerEvent::OnlineUsers { users }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> AuthUser {
        AuthUser {
            id: id.to_string(),
            name: id.to_uppercase(),
            avatar: None,
        }
    }

    #[tokio::test]
    async fn register_and_unregister_track_online_state() {
        let registry = PresenceRegistry::new();
        let (tx, _rx) = mpsc::channel(8);

        registry.register(user("alice"), tx).await;
        assert!(registry.is_online("alice").await);
        assert!(!registry.is_online("bob").await);

        registry.unregister("alice").await;
        assert!(!registry.is_online("alice").await);
    }

    #[tokio::test]
    async fn sweep_removes_only_idle_entries() {
        let registry = PresenceRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        registry.register(user("alice"), tx).await;

        let now = Utc::now();
        assert_eq!(registry.sweep(now + Duration::minutes(4), idle_threshold()).await, 0);
        assert!(registry.is_online("alice").await);

        assert_eq!(registry.sweep(now + Duration::minutes(6), idle_threshold()).await, 1);
        assert!(!registry.is_online("alice").await);
    }

    #[tokio::test]
    async fn touch_keeps_an_entry_alive_through_a_sweep() {
        let registry = PresenceRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        registry.register(user("alice"), tx).await;

        let registered_at = Utc::now();
        tokio::time::sleep(StdDuration::from_millis(5)).await;
        registry.touch("alice").await;

        registry
            .sweep(registered_at + Duration::minutes(5), Duration::minutes(5) - Duration::milliseconds(1))
            .await;
        assert!(registry.is_online("alice").await);
    }

    #[tokio::test]
    async fn snapshot_defaults_status_to_online() {
        let registry = PresenceRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        registry.register(user("alice"), tx).await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status, "online");

        assert!(registry.set_status("alice", "away".into()).await);
        assert_eq!(registry.snapshot().await[0].status, "away");
        assert!(!registry.set_status("bob", "away".into()).await);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_registered_connection() {
        let registry = PresenceRegistry::new();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        registry.register(user("alice"), tx_a).await;
        registry.register(user("bob"), tx_b).await;

        registry.broadcast_snapshot().await;

        for rx in [&mut rx_a, &mut rx_b] {
            match rx.try_recv().unwrap() {
                ServerEvent::OnlineUsers { users } => assert_eq!(users.len(), 2),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn reconnection_replaces_the_previous_handle() {
        let registry = PresenceRegistry::new();
        let (tx_old, mut rx_old) = mpsc::channel(8);
        let (tx_new, mut rx_new) = mpsc::channel(8);

        registry.register(user("alice"), tx_old).await;
        registry.register(user("alice"), tx_new).await;

        registry.broadcast(ServerEvent::error("ping")).await;
        assert!(rx_old.try_recv().is_err());
        assert!(rx_new.try_recv().is_ok());
        assert_eq!(registry.snapshot().await.len(), 1);
    }
}
