use serde::{Deserialize, Serialize};

use crate::models::Message;

// -- Rooms --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateRoomRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct RoomListResponse {
    pub rooms: Vec<String>,
}

// -- History --

/// One page of history. Page 1 is the newest slice; items within a
/// page run oldest to newest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub items: Vec<Message>,
    pub total: usize,
}
