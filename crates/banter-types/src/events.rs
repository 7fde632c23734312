use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, SessionInfo};

/// Commands sent FROM client TO server over the gateway socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientCommand {
    /// Claim a display name and enter a room.
    Join { username: String, room: String },

    /// Move this session to another room.
    SwitchRoom { room: String },

    /// Post a message to the current room.
    SendMessage {
        text: String,
        file_url: Option<String>,
    },

    /// Send a message to exactly one user (delivered to all of their
    /// devices, and to the sender's other devices).
    SendPrivate {
        to: String,
        text: String,
        file_url: Option<String>,
    },

    /// Typing indicator. `to` scopes it to a private conversation;
    /// otherwise it goes to the current room.
    Typing { to: Option<String> },

    /// React to a message.
    React { message_id: Uuid, reaction: String },

    /// Mark a message as read.
    MarkRead { message_id: Uuid },
}

/// Events sent FROM server TO clients.
///
/// The first group are acks, delivered only to the connection that
/// originated a command. The rest are broadcasts to whichever
/// connections the dispatcher resolves as the audience.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    /// Ack for a successful Join/SwitchRoom: the room and who is in it.
    Joined {
        room: String,
        users: Vec<SessionInfo>,
    },

    /// Ack for a send: the message was stored and fanned out.
    Delivered { id: Uuid },

    /// Ack carrying the updated record after a reaction or read receipt.
    MessageUpdate { message: Message },

    /// Success ack for commands with nothing else to report.
    Ack,

    /// Per-command failure, delivered to the originator only.
    Error { error: String },

    /// A message addressed to you (room broadcast or private copy).
    ReceiveMessage { message: Message },

    /// Somebody is typing.
    Typing { from: String, private: bool },

    /// Current presence snapshot for a room.
    Presence {
        room: String,
        users: Vec<SessionInfo>,
    },

    /// A user's session left the room (room switch or disconnect).
    UserLeft { room: String, username: String },

    /// A reaction was added to a message.
    ReactionAdd {
        message_id: Uuid,
        user: String,
        reaction: String,
    },

    /// A user marked a message read.
    ReadReceipt { message_id: Uuid, user: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let json = r#"{"type":"Join","data":{"username":"alice","room":"global"}}"#;
        let cmd: ClientCommand = serde_json::from_str(json).unwrap();
        assert!(
            matches!(cmd, ClientCommand::Join { username, room } if username == "alice" && room == "global")
        );
    }

    #[test]
    fn test_ack_without_payload() {
        let json = serde_json::to_string(&ServerEvent::Ack).unwrap();
        assert_eq!(json, r#"{"type":"Ack"}"#);
    }
}
