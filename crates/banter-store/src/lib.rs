pub mod presence;
pub mod rooms;
pub mod store;

pub use presence::{EventSender, PresenceRegistry, Session};
pub use rooms::{DEFAULT_ROOM, RoomDirectory};
pub use store::{HistoryFilter, MessageStore};
