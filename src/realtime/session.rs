use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use super::events::{Broadcast, ClientEvent, ErrorCode, ServerEvent};
use super::hub::{ChatHub, Connection};
use super::store::{ChatError, ChatStore};
use crate::permissions::Principal;

/// What the socket loop should do after a client event
pub enum Outcome {
    /// Send a single event back to this client
    Reply(ServerEvent),
    /// Start forwarding a room; `joined` goes to the client first
    Subscribed {
        conversation_id: Uuid,
        receiver: broadcast::Receiver<Broadcast>,
        joined: ServerEvent,
    },
    /// Stop forwarding a room and confirm with `left`
    Unsubscribed { conversation_id: Uuid },
    Nothing,
}

/// Trim a message body and check it against the length limit
pub fn validate_body(body: &str, max_length: usize) -> Result<String, ChatError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(ChatError::InvalidMessage("Message body cannot be empty".to_string()));
    }
    if trimmed.chars().count() > max_length {
        return Err(ChatError::InvalidMessage(format!(
            "Message body exceeds {} characters",
            max_length
        )));
    }
    Ok(trimmed.to_string())
}

/// Per-connection protocol state machine. Socket I/O lives in `websocket`.
pub struct Session {
    hub: Arc<ChatHub>,
    store: Arc<dyn ChatStore>,
    principal: Principal,
    connection_id: Uuid,
    max_message_length: usize,
}

impl Session {
    /// Register with the hub; the returned connection carries the presence feed
    pub async fn open(
        hub: Arc<ChatHub>,
        store: Arc<dyn ChatStore>,
        principal: Principal,
        max_message_length: usize,
    ) -> (Self, Connection) {
        let connection = hub.connect(principal).await;
        let session = Self {
            hub,
            store,
            principal,
            connection_id: connection.id,
            max_message_length,
        };
        (session, connection)
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn principal(&self) -> Principal {
        self.principal
    }

    pub async fn handle_text(&self, text: &str) -> Outcome {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.handle(event).await,
            Err(e) => Outcome::Reply(ServerEvent::error(ErrorCode::InvalidEvent, format!("Invalid event: {}", e))),
        }
    }

    pub async fn handle(&self, event: ClientEvent) -> Outcome {
        match event {
            ClientEvent::Ping => Outcome::Reply(ServerEvent::Pong),
            ClientEvent::Join { conversation_id } => self.join(conversation_id).await,
            ClientEvent::Leave { conversation_id } => {
                if self.hub.leave(self.connection_id, conversation_id).await {
                    Outcome::Unsubscribed { conversation_id }
                } else {
                    Outcome::Reply(not_joined(conversation_id))
                }
            }
            ClientEvent::Typing {
                conversation_id,
                is_typing,
            } => {
                if !self.hub.is_joined(self.connection_id, conversation_id).await {
                    return Outcome::Reply(not_joined(conversation_id));
                }
                self.hub
                    .set_typing(conversation_id, self.principal.user_id, is_typing, Some(self.connection_id))
                    .await;
                Outcome::Nothing
            }
            ClientEvent::Send {
                conversation_id,
                body,
                client_id,
            } => match self.send(conversation_id, &body, client_id).await {
                Ok(()) => Outcome::Nothing,
                Err(reply) => Outcome::Reply(reply),
            },
            ClientEvent::Read {
                conversation_id,
                message_id,
            } => match self.read(conversation_id, message_id).await {
                Ok(()) => Outcome::Nothing,
                Err(reply) => Outcome::Reply(reply),
            },
        }
    }

    async fn join(&self, conversation_id: Uuid) -> Outcome {
        let p = self.principal;
        match self.store.is_member(p.company_id, conversation_id, p.user_id).await {
            Ok(true) => {}
            Ok(false) => {
                return Outcome::Reply(ServerEvent::error(
                    ErrorCode::Forbidden,
                    "Not a member of this conversation",
                ))
            }
            Err(e) => return Outcome::Reply(chat_error(e)),
        }

        let (receiver, snapshot) = self.hub.join(self.connection_id, p.user_id, conversation_id).await;
        tracing::debug!("Connection {} joined conversation {}", self.connection_id, conversation_id);

        Outcome::Subscribed {
            conversation_id,
            receiver,
            joined: ServerEvent::Joined {
                conversation_id,
                online_members: snapshot.online_members,
                typing: snapshot.typing,
            },
        }
    }

    async fn send(&self, conversation_id: Uuid, body: &str, client_id: Option<String>) -> Result<(), ServerEvent> {
        if !self.hub.is_joined(self.connection_id, conversation_id).await {
            return Err(not_joined(conversation_id));
        }
        let body = validate_body(body, self.max_message_length).map_err(chat_error)?;

        let p = self.principal;
        let message = self
            .store
            .create_message(p.company_id, conversation_id, p.user_id, &body)
            .await
            .map_err(chat_error)?;

        self.hub
            .set_typing(conversation_id, p.user_id, false, Some(self.connection_id))
            .await;
        self.hub
            .publish(
                conversation_id,
                ServerEvent::MessageCreated { message, client_id },
                Some(self.connection_id),
            )
            .await;
        Ok(())
    }

    async fn read(&self, conversation_id: Uuid, message_id: Uuid) -> Result<(), ServerEvent> {
        if !self.hub.is_joined(self.connection_id, conversation_id).await {
            return Err(not_joined(conversation_id));
        }

        let p = self.principal;
        let read_at = self
            .store
            .mark_read(p.company_id, conversation_id, p.user_id, message_id)
            .await
            .map_err(chat_error)?;

        self.hub
            .publish(
                conversation_id,
                ServerEvent::ReadReceipt {
                    conversation_id,
                    user_id: p.user_id,
                    message_id,
                    read_at,
                },
                Some(self.connection_id),
            )
            .await;
        Ok(())
    }

    /// Leave every room and drop presence
    pub async fn close(self) {
        self.hub.disconnect(self.connection_id, self.principal).await;
    }
}

fn not_joined(conversation_id: Uuid) -> ServerEvent {
    ServerEvent::error(
        ErrorCode::NotJoined,
        format!("Join conversation {} first", conversation_id),
    )
}

fn chat_error(err: ChatError) -> ServerEvent {
    match err {
        ChatError::NotMember => ServerEvent::error(ErrorCode::Forbidden, err.to_string()),
        ChatError::NotFound(_) => ServerEvent::error(ErrorCode::NotFound, err.to_string()),
        ChatError::InvalidMessage(msg) => ServerEvent::error(ErrorCode::InvalidMessage, msg),
        ChatError::Database(e) => {
            tracing::error!("Realtime store error: {}", e);
            ServerEvent::error(ErrorCode::Internal, "Internal error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::Role;
    use crate::realtime::store::memory::MemoryChatStore;
    use std::time::Duration;

    struct Fixture {
        hub: Arc<ChatHub>,
        store: Arc<MemoryChatStore>,
        company_id: Uuid,
        conversation_id: Uuid,
        alice: Principal,
        bob: Principal,
    }

    impl Fixture {
        fn new() -> Self {
            let company_id = Uuid::new_v4();
            let conversation_id = Uuid::new_v4();
            let alice = Principal {
                user_id: Uuid::new_v4(),
                company_id,
                role: Role::Employee,
            };
            let bob = Principal {
                user_id: Uuid::new_v4(),
                company_id,
                role: Role::Manager,
            };
            Self {
                hub: Arc::new(ChatHub::new(32, Duration::from_secs(5))),
                store: Arc::new(MemoryChatStore::with_members(conversation_id, &[alice.user_id, bob.user_id])),
                company_id,
                conversation_id,
                alice,
                bob,
            }
        }

        async fn open(&self, principal: Principal) -> Session {
            let store: Arc<dyn ChatStore> = self.store.clone();
            Session::open(self.hub.clone(), store, principal, 20).await.0
        }

        async fn joined(&self, session: &Session) -> broadcast::Receiver<Broadcast> {
            match session
                .handle(ClientEvent::Join {
                    conversation_id: self.conversation_id,
                })
                .await
            {
                Outcome::Subscribed { receiver, .. } => receiver,
                _ => panic!("expected subscription"),
            }
        }
    }

    fn error_code(outcome: Outcome) -> ErrorCode {
        match outcome {
            Outcome::Reply(ServerEvent::Error { code, .. }) => code,
            _ => panic!("expected an error reply"),
        }
    }

    fn drain(rx: &mut broadcast::Receiver<Broadcast>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(b) = rx.try_recv() {
            events.push(b.event);
        }
        events
    }

    #[test]
    fn bodies_are_trimmed_and_bounded() {
        assert_eq!(validate_body("  hello \n", 10).unwrap(), "hello");
        assert!(matches!(validate_body("   ", 10), Err(ChatError::InvalidMessage(_))));
        assert!(validate_body("ééééé", 5).is_ok());
        assert!(validate_body("ééééé!", 5).is_err());
    }

    #[tokio::test]
    async fn ping_gets_pong() {
        let fx = Fixture::new();
        let session = fx.open(fx.alice).await;
        assert!(matches!(session.handle_text(r#"{"type":"ping"}"#).await, Outcome::Reply(ServerEvent::Pong)));
    }

    #[tokio::test]
    async fn garbage_is_an_invalid_event() {
        let fx = Fixture::new();
        let session = fx.open(fx.alice).await;
        assert_eq!(error_code(session.handle_text("not json").await), ErrorCode::InvalidEvent);
    }

    #[tokio::test]
    async fn non_members_cannot_join() {
        let fx = Fixture::new();
        let outsider = Principal {
            user_id: Uuid::new_v4(),
            company_id: fx.company_id,
            role: Role::Owner,
        };
        let session = fx.open(outsider).await;
        let outcome = session
            .handle(ClientEvent::Join {
                conversation_id: fx.conversation_id,
            })
            .await;
        assert_eq!(error_code(outcome), ErrorCode::Forbidden);
        assert_eq!(fx.hub.room_count().await, 0);
    }

    #[tokio::test]
    async fn actions_require_joining_first() {
        let fx = Fixture::new();
        let session = fx.open(fx.alice).await;
        let conversation_id = fx.conversation_id;

        let send = session
            .handle(ClientEvent::Send {
                conversation_id,
                body: "hi".to_string(),
                client_id: None,
            })
            .await;
        assert_eq!(error_code(send), ErrorCode::NotJoined);

        let typing = session
            .handle(ClientEvent::Typing {
                conversation_id,
                is_typing: true,
            })
            .await;
        assert_eq!(error_code(typing), ErrorCode::NotJoined);

        let leave = session.handle(ClientEvent::Leave { conversation_id }).await;
        assert_eq!(error_code(leave), ErrorCode::NotJoined);
        assert!(fx.store.messages().is_empty());
    }

    #[tokio::test]
    async fn sent_messages_are_persisted_and_broadcast() {
        let fx = Fixture::new();
        let alice = fx.open(fx.alice).await;
        let bob = fx.open(fx.bob).await;
        let _alice_rx = fx.joined(&alice).await;
        let mut bob_rx = fx.joined(&bob).await;

        alice
            .handle(ClientEvent::Typing {
                conversation_id: fx.conversation_id,
                is_typing: true,
            })
            .await;
        drain(&mut bob_rx);

        let outcome = alice
            .handle(ClientEvent::Send {
                conversation_id: fx.conversation_id,
                body: "  morning  ".to_string(),
                client_id: Some("tmp-1".to_string()),
            })
            .await;
        assert!(matches!(outcome, Outcome::Nothing));

        let stored = fx.store.messages();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].body, "morning");

        let events = drain(&mut bob_rx);
        assert_eq!(
            events[0],
            ServerEvent::Typing {
                conversation_id: fx.conversation_id,
                user_id: fx.alice.user_id,
                is_typing: false
            }
        );
        assert_eq!(
            events[1],
            ServerEvent::MessageCreated {
                message: stored[0].clone(),
                client_id: Some("tmp-1".to_string())
            }
        );
    }

    #[tokio::test]
    async fn oversized_messages_are_rejected() {
        let fx = Fixture::new();
        let alice = fx.open(fx.alice).await;
        fx.joined(&alice).await;

        let outcome = alice
            .handle(ClientEvent::Send {
                conversation_id: fx.conversation_id,
                body: "x".repeat(21),
                client_id: None,
            })
            .await;
        assert_eq!(error_code(outcome), ErrorCode::InvalidMessage);
        assert!(fx.store.messages().is_empty());
    }

    #[tokio::test]
    async fn read_receipts_are_recorded_and_broadcast() {
        let fx = Fixture::new();
        let alice = fx.open(fx.alice).await;
        let bob = fx.open(fx.bob).await;
        let mut alice_rx = fx.joined(&alice).await;
        fx.joined(&bob).await;

        alice
            .handle(ClientEvent::Send {
                conversation_id: fx.conversation_id,
                body: "ping".to_string(),
                client_id: None,
            })
            .await;
        let message_id = fx.store.messages()[0].id;
        drain(&mut alice_rx);

        let outcome = bob
            .handle(ClientEvent::Read {
                conversation_id: fx.conversation_id,
                message_id,
            })
            .await;
        assert!(matches!(outcome, Outcome::Nothing));
        assert_eq!(fx.store.last_read(fx.conversation_id, fx.bob.user_id), Some(message_id));

        let events = drain(&mut alice_rx);
        assert!(matches!(
            events.as_slice(),
            [ServerEvent::ReadReceipt { user_id, message_id: read, .. }] if *user_id == fx.bob.user_id && *read == message_id
        ));

        let unknown = bob
            .handle(ClientEvent::Read {
                conversation_id: fx.conversation_id,
                message_id: Uuid::new_v4(),
            })
            .await;
        assert_eq!(error_code(unknown), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn closing_leaves_rooms_and_presence() {
        let fx = Fixture::new();
        let alice = fx.open(fx.alice).await;
        fx.joined(&alice).await;
        assert_eq!(fx.hub.online_users(fx.company_id).await, vec![fx.alice.user_id]);

        alice.close().await;
        assert_eq!(fx.hub.room_count().await, 0);
        assert!(fx.hub.online_users(fx.company_id).await.is_empty());
    }
}
