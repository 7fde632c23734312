use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use banter_types::error::ChatError;
use banter_types::events::ServerEvent;
use banter_types::models::SessionInfo;

/// Outbound handle for one connection. Sends never block; once the
/// receiving task is gone the send is a no-op.
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// One live session: a connection, its claimed name and current room.
#[derive(Debug, Clone)]
pub struct Session {
    pub conn_id: Uuid,
    pub username: String,
    pub room: String,
    pub last_seen: DateTime<Utc>,
    pub sender: EventSender,
}

impl Session {
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            username: self.username.clone(),
            room: self.room.clone(),
            last_seen: self.last_seen,
        }
    }
}

/// Bidirectional session index: `conn_id -> Session` and
/// `username -> conn set`, kept consistent under a single lock so no
/// reader can observe a half-applied join or leave.
#[derive(Clone)]
pub struct PresenceRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<Uuid, Session>,
    by_username: HashMap<String, HashSet<Uuid>>,
}

impl RegistryInner {
    fn unlink(&mut self, conn_id: Uuid) -> Option<Session> {
        let session = self.sessions.remove(&conn_id)?;
        if let Some(conns) = self.by_username.get_mut(&session.username) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                self.by_username.remove(&session.username);
            }
        }
        Some(session)
    }
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner::default())),
        }
    }

    /// Create or replace the session for a connection. A rejoin on the
    /// same connection overwrites its previous entry rather than
    /// duplicating it. Returns the replaced session, if any.
    pub async fn upsert(
        &self,
        conn_id: Uuid,
        username: &str,
        room: &str,
        sender: EventSender,
    ) -> Option<Session> {
        let mut inner = self.inner.write().await;
        let previous = inner.unlink(conn_id);
        inner.sessions.insert(
            conn_id,
            Session {
                conn_id,
                username: username.to_string(),
                room: room.to_string(),
                last_seen: Utc::now(),
                sender,
            },
        );
        inner
            .by_username
            .entry(username.to_string())
            .or_default()
            .insert(conn_id);
        previous
    }

    /// Drop a session. Idempotent: a second call for the same
    /// connection finds nothing and returns `None`.
    pub async fn remove(&self, conn_id: Uuid) -> Option<Session> {
        self.inner.write().await.unlink(conn_id)
    }

    /// Move a session to another room, returning the room it left.
    pub async fn change_room(&self, conn_id: Uuid, new_room: &str) -> Result<String, ChatError> {
        let mut inner = self.inner.write().await;
        let session = inner.sessions.get_mut(&conn_id).ok_or(ChatError::NotJoined)?;
        let old_room = std::mem::replace(&mut session.room, new_room.to_string());
        session.last_seen = Utc::now();
        Ok(old_room)
    }

    /// Bump `last_seen` for a session, if it exists.
    pub async fn touch(&self, conn_id: Uuid) {
        let mut inner = self.inner.write().await;
        if let Some(session) = inner.sessions.get_mut(&conn_id) {
            session.last_seen = Utc::now();
        }
    }

    pub async fn get(&self, conn_id: Uuid) -> Option<Session> {
        self.inner.read().await.sessions.get(&conn_id).cloned()
    }

    /// Presence snapshot for a room, sorted by username for stable
    /// output.
    pub async fn list_in_room(&self, room: &str) -> Vec<SessionInfo> {
        let inner = self.inner.read().await;
        let mut users: Vec<SessionInfo> = inner
            .sessions
            .values()
            .filter(|s| s.room == room)
            .map(Session::info)
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }

    /// Delivery handles for every connection currently in a room.
    pub async fn room_senders(&self, room: &str) -> Vec<(Uuid, EventSender)> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .values()
            .filter(|s| s.room == room)
            .map(|s| (s.conn_id, s.sender.clone()))
            .collect()
    }

    /// Delivery handles for every connection a username currently has
    /// (multi-device fan-out).
    pub async fn find_by_username(&self, username: &str) -> Vec<(Uuid, EventSender)> {
        let inner = self.inner.read().await;
        inner
            .by_username
            .get(username)
            .into_iter()
            .flatten()
            .filter_map(|conn_id| inner.sessions.get(conn_id))
            .map(|s| (s.conn_id, s.sender.clone()))
            .collect()
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> EventSender {
        mpsc::unbounded_channel().0
    }

    #[tokio::test]
    async fn test_presence_tracks_joins_and_disconnects() {
        let registry = PresenceRegistry::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        registry.upsert(alice, "alice", "global", sender()).await;
        registry.upsert(bob, "bob", "global", sender()).await;

        let users = registry.list_in_room("global").await;
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].username, "alice");
        assert_eq!(users[1].username, "bob");

        registry.remove(bob).await.unwrap();
        let users = registry.list_in_room("global").await;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "alice");

        // Second remove is a no-op.
        assert!(registry.remove(bob).await.is_none());
    }

    #[tokio::test]
    async fn test_rejoin_overwrites_instead_of_duplicating() {
        let registry = PresenceRegistry::new();
        let conn = Uuid::new_v4();

        registry.upsert(conn, "alice", "global", sender()).await;
        let previous = registry.upsert(conn, "alicia", "dev", sender()).await;

        assert_eq!(previous.unwrap().username, "alice");
        assert!(registry.list_in_room("global").await.is_empty());
        assert_eq!(registry.list_in_room("dev").await.len(), 1);
        assert!(registry.find_by_username("alice").await.is_empty());
        assert_eq!(registry.find_by_username("alicia").await.len(), 1);
    }

    #[tokio::test]
    async fn test_multi_device_lookup_by_username() {
        let registry = PresenceRegistry::new();
        let phone = Uuid::new_v4();
        let laptop = Uuid::new_v4();

        registry.upsert(phone, "carol", "global", sender()).await;
        registry.upsert(laptop, "carol", "dev", sender()).await;

        let conns: Vec<Uuid> = registry
            .find_by_username("carol")
            .await
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(conns.len(), 2);
        assert!(conns.contains(&phone));
        assert!(conns.contains(&laptop));

        registry.remove(phone).await;
        assert_eq!(registry.find_by_username("carol").await.len(), 1);
    }

    #[tokio::test]
    async fn test_change_room_moves_session() {
        let registry = PresenceRegistry::new();
        let conn = Uuid::new_v4();
        registry.upsert(conn, "alice", "global", sender()).await;

        let old = registry.change_room(conn, "dev").await.unwrap();
        assert_eq!(old, "global");
        assert!(registry.list_in_room("global").await.is_empty());
        assert_eq!(registry.list_in_room("dev").await.len(), 1);

        let stranger = Uuid::new_v4();
        assert_eq!(
            registry.change_room(stranger, "dev").await.unwrap_err(),
            ChatError::NotJoined
        );
    }
}
