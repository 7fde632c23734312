pub mod history;
pub mod rooms;

use std::sync::Arc;

use banter_store::{MessageStore, PresenceRegistry, RoomDirectory};

/// Shared handles the REST handlers work against. The same components
/// back the gateway dispatcher, so REST reads always observe gateway
/// writes.
pub struct AppStateInner {
    pub store: MessageStore,
    pub presence: PresenceRegistry,
    pub rooms: RoomDirectory,
}

pub type AppState = Arc<AppStateInner>;
