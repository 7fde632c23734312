use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::RwLock;

/// The room every deployment starts with.
pub const DEFAULT_ROOM: &str = "global";

/// The set of known room names, case-sensitive. Rooms appear on first
/// join or explicit create and are never removed, even when empty.
#[derive(Clone)]
pub struct RoomDirectory {
    inner: Arc<RwLock<BTreeSet<String>>>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        let mut rooms = BTreeSet::new();
        rooms.insert(DEFAULT_ROOM.to_string());
        Self {
            inner: Arc::new(RwLock::new(rooms)),
        }
    }

    /// Insert-if-absent. Returns true when the room was newly created.
    pub async fn ensure(&self, name: &str) -> bool {
        self.inner.write().await.insert(name.to_string())
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.inner.read().await.contains(name)
    }

    /// All known rooms, sorted.
    pub async fn list(&self) -> Vec<String> {
        self.inner.read().await.iter().cloned().collect()
    }
}

impl Default for RoomDirectory {
    fn default() -> Self {
        Self::new()
    }
}
