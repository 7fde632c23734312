use tracing::info;
use uuid::Uuid;

use banter_store::presence::{EventSender, PresenceRegistry};
use banter_store::rooms::RoomDirectory;
use banter_store::store::MessageStore;
use banter_types::error::ChatError;
use banter_types::events::ServerEvent;
use banter_types::models::{Message, MessageDraft};

/// Routes every inbound event to the exact set of live connections
/// that must see it, going through the store/registry/directory write
/// contracts for all side effects.
///
/// Each operation returns the ack for the originating connection,
/// a value distinct from whatever gets broadcast to the audience.
#[derive(Clone)]
pub struct Dispatcher {
    store: MessageStore,
    presence: PresenceRegistry,
    rooms: RoomDirectory,
}

impl Dispatcher {
    pub fn new(store: MessageStore, presence: PresenceRegistry, rooms: RoomDirectory) -> Self {
        Self {
            store,
            presence,
            rooms,
        }
    }

    /// Claim a display name and enter a room. Rejoining on the same
    /// connection replaces the previous session.
    pub async fn join(
        &self,
        conn_id: Uuid,
        sender: EventSender,
        username: &str,
        room: &str,
    ) -> Result<ServerEvent, ChatError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ChatError::Validation("username must not be empty".into()));
        }
        let room = room.trim();
        if room.is_empty() {
            return Err(ChatError::Validation("room must not be empty".into()));
        }

        if self.rooms.ensure(room).await {
            info!("room {} created on first join", room);
        }
        let previous = self.presence.upsert(conn_id, username, room, sender).await;
        info!("{} ({}) joined {}", username, conn_id, room);

        // A rejoin that changed rooms vacates the old one.
        if let Some(prev) = previous {
            if prev.room != room {
                self.broadcast_presence(&prev.room).await;
            }
        }

        let users = self.presence.list_in_room(room).await;
        self.broadcast_presence(room).await;
        Ok(ServerEvent::Joined {
            room: room.to_string(),
            users,
        })
    }

    /// Move a joined session to another room, auto-creating it.
    pub async fn switch_room(&self, conn_id: Uuid, room: &str) -> Result<ServerEvent, ChatError> {
        let room = room.trim();
        if room.is_empty() {
            return Err(ChatError::Validation("room must not be empty".into()));
        }

        // The session invariant needs the room registered before any
        // reader can see a session pointing at it.
        self.rooms.ensure(room).await;
        let old_room = self.presence.change_room(conn_id, room).await?;
        info!("{} moved from {} to {}", conn_id, old_room, room);

        if old_room != room {
            self.broadcast_presence(&old_room).await;
        }
        let users = self.presence.list_in_room(room).await;
        self.broadcast_presence(room).await;
        Ok(ServerEvent::Joined {
            room: room.to_string(),
            users,
        })
    }

    /// Transport closed the connection. Idempotent: the second call
    /// finds no session and does nothing.
    pub async fn disconnect(&self, conn_id: Uuid) {
        if let Some(session) = self.presence.remove(conn_id).await {
            info!("{} ({}) left {}", session.username, conn_id, session.room);
            self.broadcast_presence(&session.room).await;
            self.send_to_room(
                &session.room,
                &ServerEvent::UserLeft {
                    room: session.room.clone(),
                    username: session.username.clone(),
                },
            )
            .await;
        }
    }

    /// Post a message to the sender's current room.
    pub async fn send_public(
        &self,
        conn_id: Uuid,
        text: String,
        file_url: Option<String>,
    ) -> Result<ServerEvent, ChatError> {
        let session = self.presence.get(conn_id).await.ok_or(ChatError::NotJoined)?;
        self.presence.touch(conn_id).await;

        let message = self
            .store
            .append(MessageDraft {
                text,
                file_url,
                sender: session.username.clone(),
                room: Some(session.room.clone()),
                is_private: false,
                recipient: None,
            })
            .await;

        let targets = self.presence.room_senders(&session.room).await;
        self.deliver(&targets, &message).await;
        Ok(ServerEvent::Delivered { id: message.id })
    }

    /// Send a message to one user. All of the recipient's connections
    /// get it, and so do the sender's (other devices included).
    pub async fn send_private(
        &self,
        conn_id: Uuid,
        to: &str,
        text: String,
        file_url: Option<String>,
    ) -> Result<ServerEvent, ChatError> {
        let session = self.presence.get(conn_id).await.ok_or(ChatError::NotJoined)?;
        let to = to.trim();
        if to.is_empty() {
            return Err(ChatError::Validation("recipient must not be empty".into()));
        }
        self.presence.touch(conn_id).await;

        let message = self
            .store
            .append(MessageDraft {
                text,
                file_url,
                sender: session.username.clone(),
                room: None,
                is_private: true,
                recipient: Some(to.to_string()),
            })
            .await;

        let mut targets = self.presence.find_by_username(to).await;
        for target in self.presence.find_by_username(&session.username).await {
            if !targets.iter().any(|(id, _)| *id == target.0) {
                targets.push(target);
            }
        }
        self.deliver(&targets, &message).await;
        Ok(ServerEvent::Delivered { id: message.id })
    }

    /// Typing indicator. Private typing goes to every connection of
    /// `to`; room typing goes to the room minus the typist's own
    /// connection.
    pub async fn typing(&self, conn_id: Uuid, to: Option<&str>) -> Result<ServerEvent, ChatError> {
        let session = self.presence.get(conn_id).await.ok_or(ChatError::NotJoined)?;
        self.presence.touch(conn_id).await;

        match to {
            Some(to) => {
                let event = ServerEvent::Typing {
                    from: session.username.clone(),
                    private: true,
                };
                for (_, tx) in self.presence.find_by_username(to).await {
                    let _ = tx.send(event.clone());
                }
            }
            None => {
                let event = ServerEvent::Typing {
                    from: session.username.clone(),
                    private: false,
                };
                for (id, tx) in self.presence.room_senders(&session.room).await {
                    if id != conn_id {
                        let _ = tx.send(event.clone());
                    }
                }
            }
        }
        Ok(ServerEvent::Ack)
    }

    /// React to a message. The audience is the message's room for a
    /// public message, or both participants for a private one.
    pub async fn react(
        &self,
        conn_id: Uuid,
        message_id: Uuid,
        reaction: &str,
    ) -> Result<ServerEvent, ChatError> {
        let session = self.presence.get(conn_id).await.ok_or(ChatError::NotJoined)?;
        self.presence.touch(conn_id).await;

        let updated = self
            .store
            .add_reaction(message_id, &session.username, reaction)
            .await?;
        let event = ServerEvent::ReactionAdd {
            message_id,
            user: session.username.clone(),
            reaction: reaction.to_string(),
        };
        self.notify_message_audience(&updated, &event).await;
        Ok(ServerEvent::MessageUpdate { message: updated })
    }

    /// Read receipt. Same audience resolution as reactions.
    pub async fn mark_read(
        &self,
        conn_id: Uuid,
        message_id: Uuid,
    ) -> Result<ServerEvent, ChatError> {
        let session = self.presence.get(conn_id).await.ok_or(ChatError::NotJoined)?;
        self.presence.touch(conn_id).await;

        let updated = self.store.mark_read(message_id, &session.username).await?;
        let event = ServerEvent::ReadReceipt {
            message_id,
            user: session.username.clone(),
        };
        self.notify_message_audience(&updated, &event).await;
        Ok(ServerEvent::MessageUpdate { message: updated })
    }

    /// Hand a stored message to each target and record the delivery.
    /// A target whose receiving task is already gone is skipped.
    async fn deliver(&self, targets: &[(Uuid, EventSender)], message: &Message) {
        for (conn_id, tx) in targets {
            let event = ServerEvent::ReceiveMessage {
                message: message.clone(),
            };
            if tx.send(event).is_ok() {
                self.store.mark_delivered(message.id, *conn_id).await;
            }
        }
    }

    async fn notify_message_audience(&self, message: &Message, event: &ServerEvent) {
        if message.is_private {
            let recipient = message.recipient.as_deref().unwrap_or_default();
            let mut targets = self.presence.find_by_username(&message.sender).await;
            if recipient != message.sender {
                targets.extend(self.presence.find_by_username(recipient).await);
            }
            for (_, tx) in targets {
                let _ = tx.send(event.clone());
            }
        } else if let Some(room) = &message.room {
            self.send_to_room(room, event).await;
        }
    }

    async fn broadcast_presence(&self, room: &str) {
        let users = self.presence.list_in_room(room).await;
        let event = ServerEvent::Presence {
            room: room.to_string(),
            users,
        };
        self.send_to_room(room, &event).await;
    }

    async fn send_to_room(&self, room: &str, event: &ServerEvent) {
        for (_, tx) in self.presence.room_senders(room).await {
            let _ = tx.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use banter_store::store::HistoryFilter;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            MessageStore::new(),
            PresenceRegistry::new(),
            RoomDirectory::new(),
        )
    }

    fn conn() -> (Uuid, EventSender, UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Uuid::new_v4(), tx, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn received_texts(events: &[ServerEvent]) -> Vec<(String, String)> {
        events
            .iter()
            .filter_map(|e| match e {
                ServerEvent::ReceiveMessage { message } => {
                    Some((message.sender.clone(), message.text.clone()))
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_join_requires_username() {
        let d = dispatcher();
        let (id, tx, _rx) = conn();

        let err = d.join(id, tx, "   ", "global").await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        assert!(d.presence.get(id).await.is_none());
    }

    #[tokio::test]
    async fn test_join_acks_with_presence_snapshot() {
        let d = dispatcher();
        let (alice, alice_tx, mut alice_rx) = conn();
        let (bob, bob_tx, mut bob_rx) = conn();

        d.join(alice, alice_tx, "alice", "global").await.unwrap();
        let ack = d.join(bob, bob_tx, "bob", "global").await.unwrap();

        let ServerEvent::Joined { room, users } = ack else {
            panic!("expected Joined ack");
        };
        assert_eq!(room, "global");
        assert_eq!(users.len(), 2);

        // Both connections saw the updated presence broadcast.
        let alice_events = drain(&mut alice_rx);
        assert!(alice_events.iter().any(
            |e| matches!(e, ServerEvent::Presence { room, users } if room == "global" && users.len() == 2)
        ));
        let bob_events = drain(&mut bob_rx);
        assert!(bob_events
            .iter()
            .any(|e| matches!(e, ServerEvent::Presence { .. })));
    }

    #[tokio::test]
    async fn test_events_before_join_leave_state_untouched() {
        let d = dispatcher();
        let (id, _tx, _rx) = conn();

        assert_eq!(
            d.send_public(id, "hi".into(), None).await.unwrap_err(),
            ChatError::NotJoined
        );
        assert_eq!(d.typing(id, None).await.unwrap_err(), ChatError::NotJoined);
        assert_eq!(
            d.mark_read(id, Uuid::new_v4()).await.unwrap_err(),
            ChatError::NotJoined
        );

        let page = d
            .store
            .query(&HistoryFilter::Room("global".into()), 1, 10)
            .await;
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn test_public_send_reaches_room_and_only_room() {
        let d = dispatcher();
        let (alice, alice_tx, mut alice_rx) = conn();
        let (bob, bob_tx, mut bob_rx) = conn();
        let (eve, eve_tx, mut eve_rx) = conn();

        d.join(alice, alice_tx, "alice", "global").await.unwrap();
        d.join(bob, bob_tx, "bob", "global").await.unwrap();
        d.join(eve, eve_tx, "eve", "dev").await.unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);
        drain(&mut eve_rx);

        let ack = d.send_public(alice, "hi".into(), None).await.unwrap();
        let ServerEvent::Delivered { id } = ack else {
            panic!("expected Delivered ack");
        };

        let bob_events = drain(&mut bob_rx);
        assert_eq!(
            received_texts(&bob_events),
            vec![("alice".to_string(), "hi".to_string())]
        );

        // The sender's connection is part of the room audience.
        assert_eq!(received_texts(&drain(&mut alice_rx)).len(), 1);
        // Other rooms see nothing.
        assert!(received_texts(&drain(&mut eve_rx)).is_empty());

        // Delivery was recorded against the stored record.
        let stored = d.store.get(id).await.unwrap();
        assert!(stored.delivered_to.contains(&alice));
        assert!(stored.delivered_to.contains(&bob));
        assert!(!stored.delivered_to.contains(&eve));
    }

    #[tokio::test]
    async fn test_private_send_reaches_both_participants_devices() {
        let d = dispatcher();
        let (alice, alice_tx, mut alice_rx) = conn();
        let (bob, bob_tx, mut bob_rx) = conn();
        let (carol_phone, carol_phone_tx, mut carol_phone_rx) = conn();
        let (carol_laptop, carol_laptop_tx, mut carol_laptop_rx) = conn();

        d.join(alice, alice_tx, "alice", "global").await.unwrap();
        d.join(bob, bob_tx, "bob", "global").await.unwrap();
        d.join(carol_phone, carol_phone_tx, "carol", "global")
            .await
            .unwrap();
        d.join(carol_laptop, carol_laptop_tx, "carol", "dev")
            .await
            .unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);
        drain(&mut carol_phone_rx);
        drain(&mut carol_laptop_rx);

        let ack = d
            .send_private(alice, "carol", "psst".into(), None)
            .await
            .unwrap();
        assert!(matches!(ack, ServerEvent::Delivered { .. }));

        assert_eq!(received_texts(&drain(&mut carol_phone_rx)).len(), 1);
        assert_eq!(received_texts(&drain(&mut carol_laptop_rx)).len(), 1);
        assert_eq!(received_texts(&drain(&mut alice_rx)).len(), 1);
        assert!(received_texts(&drain(&mut bob_rx)).is_empty());
    }

    #[tokio::test]
    async fn test_private_send_to_self_delivers_once_per_connection() {
        let d = dispatcher();
        let (alice, alice_tx, mut alice_rx) = conn();
        d.join(alice, alice_tx, "alice", "global").await.unwrap();
        drain(&mut alice_rx);

        d.send_private(alice, "alice", "note".into(), None)
            .await
            .unwrap();
        assert_eq!(received_texts(&drain(&mut alice_rx)).len(), 1);
    }

    #[tokio::test]
    async fn test_room_typing_skips_the_typist() {
        let d = dispatcher();
        let (alice, alice_tx, mut alice_rx) = conn();
        let (bob, bob_tx, mut bob_rx) = conn();

        d.join(alice, alice_tx, "alice", "global").await.unwrap();
        d.join(bob, bob_tx, "bob", "global").await.unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        let ack = d.typing(alice, None).await.unwrap();
        assert!(matches!(ack, ServerEvent::Ack));

        assert!(drain(&mut bob_rx)
            .iter()
            .any(|e| matches!(e, ServerEvent::Typing { from, private: false } if from == "alice")));
        assert!(drain(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn test_private_typing_targets_recipient_connections() {
        let d = dispatcher();
        let (alice, alice_tx, mut alice_rx) = conn();
        let (bob, bob_tx, mut bob_rx) = conn();

        d.join(alice, alice_tx, "alice", "global").await.unwrap();
        d.join(bob, bob_tx, "bob", "dev").await.unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        d.typing(alice, Some("bob")).await.unwrap();
        assert!(drain(&mut bob_rx)
            .iter()
            .any(|e| matches!(e, ServerEvent::Typing { from, private: true } if from == "alice")));
        assert!(drain(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn test_reaction_fans_out_to_room_and_acks_updated_record() {
        let d = dispatcher();
        let (alice, alice_tx, mut alice_rx) = conn();
        let (bob, bob_tx, mut bob_rx) = conn();

        d.join(alice, alice_tx, "alice", "global").await.unwrap();
        d.join(bob, bob_tx, "bob", "global").await.unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        let ServerEvent::Delivered { id } = d.send_public(alice, "hi".into(), None).await.unwrap()
        else {
            panic!("expected Delivered ack");
        };
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        let ack = d.react(bob, id, "👍").await.unwrap();
        let ServerEvent::MessageUpdate { message } = ack else {
            panic!("expected MessageUpdate ack");
        };
        assert_eq!(message.reactions.len(), 1);
        assert_eq!(message.reactions[0].user, "bob");

        assert!(drain(&mut alice_rx).iter().any(|e| matches!(
            e,
            ServerEvent::ReactionAdd { message_id, user, .. } if *message_id == id && user == "bob"
        )));
    }

    #[tokio::test]
    async fn test_reaction_on_missing_message_is_not_found() {
        let d = dispatcher();
        let (alice, alice_tx, _alice_rx) = conn();
        d.join(alice, alice_tx, "alice", "global").await.unwrap();

        let missing = Uuid::new_v4();
        assert_eq!(
            d.react(alice, missing, "👍").await.unwrap_err(),
            ChatError::NotFound(missing)
        );
    }

    #[tokio::test]
    async fn test_read_receipt_reaches_private_participants() {
        let d = dispatcher();
        let (alice, alice_tx, mut alice_rx) = conn();
        let (carol, carol_tx, mut carol_rx) = conn();

        d.join(alice, alice_tx, "alice", "global").await.unwrap();
        d.join(carol, carol_tx, "carol", "dev").await.unwrap();
        drain(&mut alice_rx);
        drain(&mut carol_rx);

        let ServerEvent::Delivered { id } = d
            .send_private(alice, "carol", "psst".into(), None)
            .await
            .unwrap()
        else {
            panic!("expected Delivered ack");
        };
        drain(&mut alice_rx);
        drain(&mut carol_rx);

        d.mark_read(carol, id).await.unwrap();
        assert!(drain(&mut alice_rx).iter().any(|e| matches!(
            e,
            ServerEvent::ReadReceipt { message_id, user } if *message_id == id && user == "carol"
        )));
    }

    #[tokio::test]
    async fn test_switch_room_moves_presence_and_notifies_both_rooms() {
        let d = dispatcher();
        let (alice, alice_tx, mut alice_rx) = conn();
        let (bob, bob_tx, mut bob_rx) = conn();

        d.join(alice, alice_tx, "alice", "global").await.unwrap();
        d.join(bob, bob_tx, "bob", "global").await.unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        let ack = d.switch_room(alice, "dev").await.unwrap();
        assert!(matches!(ack, ServerEvent::Joined { room, .. } if room == "dev"));
        assert!(d.rooms.contains("dev").await);

        // The old room saw alice leave its presence list.
        assert!(drain(&mut bob_rx).iter().any(
            |e| matches!(e, ServerEvent::Presence { room, users } if room == "global" && users.len() == 1)
        ));

        let err = d.switch_room(Uuid::new_v4(), "dev").await.unwrap_err();
        assert_eq!(err, ChatError::NotJoined);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_notifies_room() {
        let d = dispatcher();
        let (alice, alice_tx, mut alice_rx) = conn();
        let (bob, bob_tx, mut bob_rx) = conn();

        d.join(alice, alice_tx, "alice", "global").await.unwrap();
        d.join(bob, bob_tx, "bob", "global").await.unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        d.disconnect(alice).await;
        let events = drain(&mut bob_rx);
        assert!(events.iter().any(
            |e| matches!(e, ServerEvent::UserLeft { room, username } if room == "global" && username == "alice")
        ));
        assert!(events.iter().any(
            |e| matches!(e, ServerEvent::Presence { users, .. } if users.len() == 1)
        ));

        // Second disconnect finds nothing and emits nothing.
        d.disconnect(alice).await;
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_tolerates_vanished_connection() {
        let d = dispatcher();
        let (alice, alice_tx, mut alice_rx) = conn();
        let (bob, bob_tx, bob_rx) = conn();

        d.join(alice, alice_tx, "alice", "global").await.unwrap();
        d.join(bob, bob_tx, "bob", "global").await.unwrap();
        drain(&mut alice_rx);

        // Bob's receiving task is gone but his session has not been
        // reaped yet; delivery to him must be a silent no-op.
        drop(bob_rx);

        let ServerEvent::Delivered { id } = d.send_public(alice, "hi".into(), None).await.unwrap()
        else {
            panic!("expected Delivered ack");
        };
        assert_eq!(received_texts(&drain(&mut alice_rx)).len(), 1);

        let stored = d.store.get(id).await.unwrap();
        assert!(stored.delivered_to.contains(&alice));
        assert!(!stored.delivered_to.contains(&bob));
    }
}
