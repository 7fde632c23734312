use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use banter_store::presence::EventSender;
use banter_types::events::{ClientCommand, ServerEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle one WebSocket connection for its whole lifetime.
///
/// The session starts Unjoined: until a Join succeeds, the registry has
/// no entry for this connection and every other command is rejected by
/// the dispatcher without touching shared state. Transport close from
/// either side funnels into the single disconnect call at the bottom.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher) {
    let conn_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ServerEvent>();

    info!("connection {} opened", conn_id);

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events (acks and broadcasts alike) to the socket,
    // with heartbeat.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = event_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("connection {} unserializable event: {}", conn_id, e);
                            continue;
                        }
                    };
                    if sender.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!(
                                "connection {} missed {} pongs, dropping",
                                conn_id, missed_heartbeats
                            );
                            break;
                        }
                    }
                    if sender.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from the client.
    let dispatcher_recv = dispatcher.clone();
    let command_tx = event_tx.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(frame)) = receiver.next().await {
            match frame {
                WsMessage::Text(text) => {
                    match serde_json::from_str::<ClientCommand>(&text) {
                        Ok(command) => {
                            let ack =
                                dispatch_command(&dispatcher_recv, conn_id, &command_tx, command)
                                    .await;
                            let _ = command_tx.send(ack);
                        }
                        Err(e) => {
                            warn!(
                                "connection {} bad command: {} -- raw: {}",
                                conn_id,
                                e,
                                &text[..text.len().min(200)]
                            );
                        }
                    }
                }
                WsMessage::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.disconnect(conn_id).await;
    info!("connection {} closed", conn_id);
}

/// Run one inbound command against the dispatcher, converting per-event
/// failures into an Error ack for the originator. The ack is the only
/// thing this returns; broadcasts were already enqueued to their
/// audience by the dispatcher.
async fn dispatch_command(
    dispatcher: &Dispatcher,
    conn_id: Uuid,
    event_tx: &EventSender,
    command: ClientCommand,
) -> ServerEvent {
    let result = match command {
        ClientCommand::Join { username, room } => {
            dispatcher
                .join(conn_id, event_tx.clone(), &username, &room)
                .await
        }
        ClientCommand::SwitchRoom { room } => dispatcher.switch_room(conn_id, &room).await,
        ClientCommand::SendMessage { text, file_url } => {
            dispatcher.send_public(conn_id, text, file_url).await
        }
        ClientCommand::SendPrivate { to, text, file_url } => {
            dispatcher.send_private(conn_id, &to, text, file_url).await
        }
        ClientCommand::Typing { to } => dispatcher.typing(conn_id, to.as_deref()).await,
        ClientCommand::React {
            message_id,
            reaction,
        } => dispatcher.react(conn_id, message_id, &reaction).await,
        ClientCommand::MarkRead { message_id } => dispatcher.mark_read(conn_id, message_id).await,
    };

    match result {
        Ok(ack) => ack,
        Err(e) => ServerEvent::Error {
            error: e.to_string(),
        },
    }
}
