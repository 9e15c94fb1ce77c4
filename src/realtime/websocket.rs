use std::collections::HashMap;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    Extension,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::events::{Broadcast, ErrorCode, ServerEvent};
use super::session::{Outcome, Session};
use crate::permissions::Principal;
use crate::state::AppState;

const OUTBOX_CAPACITY: usize = 64;

/// GET /api/realtime - upgrade an authenticated request to the chat socket
pub async fn realtime_ws(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| run(socket, state, principal))
}

async fn run(socket: WebSocket, state: AppState, principal: Principal) {
    let (session, connection) = Session::open(
        state.hub.clone(),
        state.chat_store.clone(),
        principal,
        state.config.realtime.max_message_length,
    )
    .await;
    let connection_id = session.connection_id();
    tracing::info!(
        "Realtime connection {} opened for user {} in company {}",
        connection_id,
        principal.user_id,
        principal.company_id
    );

    let (mut sink, mut stream) = socket.split();
    let (out, mut outbox) = mpsc::channel::<ServerEvent>(OUTBOX_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(event) = outbox.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to encode realtime event: {}", e);
                    continue;
                }
            };
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let _ = out
        .send(ServerEvent::Welcome {
            connection_id,
            online_users: connection.online_users,
        })
        .await;
    let presence = tokio::spawn(forward(connection.presence, out.clone(), connection_id, principal.user_id));
    let mut rooms: HashMap<Uuid, JoinHandle<()>> = HashMap::new();

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("Realtime connection {} read error: {}", connection_id, e);
                break;
            }
        };

        let outcome = match frame {
            WsMessage::Text(text) => session.handle_text(&text).await,
            WsMessage::Binary(_) => Outcome::Reply(ServerEvent::error(
                ErrorCode::InvalidEvent,
                "Binary frames are not supported",
            )),
            WsMessage::Close(_) => break,
            // Ping/pong frames are answered by the socket itself
            _ => Outcome::Nothing,
        };

        match outcome {
            Outcome::Reply(event) => {
                if out.send(event).await.is_err() {
                    break;
                }
            }
            Outcome::Subscribed {
                conversation_id,
                receiver,
                joined,
            } => {
                if out.send(joined).await.is_err() {
                    break;
                }
                let handle = tokio::spawn(forward(receiver, out.clone(), connection_id, principal.user_id));
                if let Some(previous) = rooms.insert(conversation_id, handle) {
                    previous.abort();
                }
            }
            Outcome::Unsubscribed { conversation_id } => {
                if let Some(handle) = rooms.remove(&conversation_id) {
                    handle.abort();
                }
                if out.send(ServerEvent::Left { conversation_id }).await.is_err() {
                    break;
                }
            }
            Outcome::Nothing => {}
        }
    }

    for handle in rooms.into_values() {
        handle.abort();
    }
    presence.abort();
    session.close().await;
    drop(out);
    let _ = writer.await;

    tracing::info!("Realtime connection {} closed", connection_id);
}

/// Typing is the only event not echoed to the connection that caused it
fn is_own_echo(broadcast: &Broadcast, connection_id: Uuid) -> bool {
    broadcast.origin == Some(connection_id) && matches!(broadcast.event, ServerEvent::Typing { .. })
}

/// Pump a broadcast receiver into the connection's outbox until the channel
/// closes, the client goes away, or this user is removed from the room
pub async fn forward(
    mut rx: broadcast::Receiver<Broadcast>,
    out: mpsc::Sender<ServerEvent>,
    connection_id: Uuid,
    user_id: Uuid,
) {
    loop {
        match rx.recv().await {
            Ok(broadcast) => {
                if is_own_echo(&broadcast, connection_id) {
                    continue;
                }
                let removed = matches!(
                    broadcast.event,
                    ServerEvent::MemberRemoved { user_id: removed, .. } if removed == user_id
                );
                if out.send(broadcast.event).await.is_err() || removed {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Realtime connection {} lagged by {} events", connection_id, skipped);
                let event = ServerEvent::error(ErrorCode::Lagged, format!("Missed {} events", skipped));
                if out.send(event).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typing(user_id: Uuid, conversation_id: Uuid) -> ServerEvent {
        ServerEvent::Typing {
            conversation_id,
            user_id,
            is_typing: true,
        }
    }

    #[tokio::test]
    async fn own_typing_is_not_echoed() {
        let (tx, rx) = broadcast::channel(8);
        let (out, mut outbox) = mpsc::channel(8);
        let me = Uuid::new_v4();
        let user = Uuid::new_v4();
        let conversation = Uuid::new_v4();

        tx.send(Broadcast {
            origin: Some(me),
            event: typing(user, conversation),
        })
        .unwrap();
        tx.send(Broadcast {
            origin: Some(Uuid::new_v4()),
            event: typing(Uuid::new_v4(), conversation),
        })
        .unwrap();
        tx.send(Broadcast {
            origin: Some(me),
            event: ServerEvent::Pong,
        })
        .unwrap();
        drop(tx);

        forward(rx, out, me, user).await;

        assert!(matches!(outbox.recv().await, Some(ServerEvent::Typing { user_id, .. }) if user_id != user));
        assert_eq!(outbox.recv().await, Some(ServerEvent::Pong));
        assert_eq!(outbox.recv().await, None);
    }

    #[tokio::test]
    async fn own_membership_and_presence_events_are_delivered() {
        let (tx, rx) = broadcast::channel(8);
        let (out, mut outbox) = mpsc::channel(8);
        let me = Uuid::new_v4();
        let user = Uuid::new_v4();
        let conversation = Uuid::new_v4();

        let own = [
            ServerEvent::Presence { user_id: user, online: true },
            ServerEvent::MemberJoined {
                conversation_id: conversation,
                user_id: user,
            },
            ServerEvent::MemberLeft {
                conversation_id: conversation,
                user_id: user,
            },
        ];
        for event in own.clone() {
            tx.send(Broadcast { origin: Some(me), event }).unwrap();
        }
        drop(tx);

        forward(rx, out, me, user).await;

        for expected in own {
            assert_eq!(outbox.recv().await, Some(expected));
        }
        assert_eq!(outbox.recv().await, None);
    }

    #[tokio::test]
    async fn lagging_receivers_are_told() {
        let (tx, rx) = broadcast::channel(2);
        let (out, mut outbox) = mpsc::channel(8);
        for _ in 0..5 {
            tx.send(Broadcast {
                origin: None,
                event: ServerEvent::Pong,
            })
            .unwrap();
        }
        drop(tx);

        forward(rx, out, Uuid::new_v4(), Uuid::new_v4()).await;

        match outbox.recv().await {
            Some(ServerEvent::Error { code, .. }) => assert_eq!(code, ErrorCode::Lagged),
            other => panic!("expected lagged error, got {:?}", other),
        }
        assert_eq!(outbox.recv().await, Some(ServerEvent::Pong));
        assert_eq!(outbox.recv().await, Some(ServerEvent::Pong));
        assert_eq!(outbox.recv().await, None);
    }

    #[tokio::test]
    async fn forwarding_stops_when_this_user_is_removed() {
        let (tx, rx) = broadcast::channel(8);
        let (out, mut outbox) = mpsc::channel(8);
        let user = Uuid::new_v4();
        let conversation = Uuid::new_v4();

        tx.send(Broadcast {
            origin: None,
            event: ServerEvent::MemberRemoved {
                conversation_id: conversation,
                user_id: user,
            },
        })
        .unwrap();
        tx.send(Broadcast {
            origin: None,
            event: ServerEvent::Pong,
        })
        .unwrap();

        forward(rx, out, Uuid::new_v4(), user).await;

        assert!(matches!(outbox.recv().await, Some(ServerEvent::MemberRemoved { .. })));
        assert_eq!(outbox.recv().await, None);
        drop(tx);
    }
}
