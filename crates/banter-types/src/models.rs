use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One reaction on a message. The same user may react with the same
/// value more than once; the store keeps them in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub user: String,
    pub reaction: String,
}

/// A relayed message. Fixed at append time except for `reactions`,
/// `read_by` and `delivered_to`, which only ever grow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub text: String,
    pub file_url: Option<String>,
    pub sender: String,
    pub created_at: DateTime<Utc>,
    /// Room the message was posted to; `None` for private messages.
    pub room: Option<String>,
    pub is_private: bool,
    /// Required when `is_private` is set.
    pub recipient: Option<String>,
    pub reactions: Vec<Reaction>,
    /// Usernames that marked the message read. Set semantics.
    pub read_by: Vec<String>,
    /// Connections the message was handed to. Set semantics.
    pub delivered_to: Vec<Uuid>,
}

/// Message content as submitted by a client, before the store assigns
/// an id and timestamp.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub text: String,
    pub file_url: Option<String>,
    pub sender: String,
    pub room: Option<String>,
    pub is_private: bool,
    pub recipient: Option<String>,
}

/// Wire-safe projection of a live session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub username: String,
    pub room: String,
    pub last_seen: DateTime<Utc>,
}
