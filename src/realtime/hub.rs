//! In-memory fan-out for chat rooms and company presence.
//!
//! Each conversation that has at least one connected client owns a
//! `broadcast` channel; each company with at least one connection owns a
//! presence channel. Nothing here is persisted: the hub only knows about the
//! connections of this process.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::events::{Broadcast, ServerEvent};
use crate::config::RealtimeConfig;
use crate::permissions::Principal;

struct Room {
    tx: broadcast::Sender<Broadcast>,
    /// connection id → user id
    connections: HashMap<Uuid, Uuid>,
    typing: HashMap<Uuid, Instant>,
}

impl Room {
    fn members(&self) -> Vec<Uuid> {
        let unique: HashSet<Uuid> = self.connections.values().copied().collect();
        let mut members: Vec<Uuid> = unique.into_iter().collect();
        members.sort();
        members
    }

    fn has_user(&self, user_id: Uuid) -> bool {
        self.connections.values().any(|u| *u == user_id)
    }

    fn send(&self, origin: Option<Uuid>, event: ServerEvent) -> usize {
        self.tx.send(Broadcast { origin, event }).unwrap_or(0)
    }
}

struct CompanyChannel {
    tx: broadcast::Sender<Broadcast>,
    /// user id → open connections
    online: HashMap<Uuid, usize>,
}

impl CompanyChannel {
    fn online_users(&self) -> Vec<Uuid> {
        let mut users: Vec<Uuid> = self.online.keys().copied().collect();
        users.sort();
        users
    }
}

#[derive(Default)]
struct HubState {
    rooms: HashMap<Uuid, Room>,
    companies: HashMap<Uuid, CompanyChannel>,
}

/// A registered client connection
pub struct Connection {
    pub id: Uuid,
    pub presence: broadcast::Receiver<Broadcast>,
    pub online_users: Vec<Uuid>,
}

/// Who is in a room right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub online_members: Vec<Uuid>,
    pub typing: Vec<Uuid>,
}

pub struct ChatHub {
    state: RwLock<HubState>,
    capacity: usize,
    typing_ttl: Duration,
}

impl ChatHub {
    pub fn new(capacity: usize, typing_ttl: Duration) -> Self {
        Self {
            state: RwLock::new(HubState::default()),
            capacity: capacity.max(1),
            typing_ttl,
        }
    }

    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self::new(config.channel_capacity, Duration::from_secs(config.typing_ttl_secs))
    }

    /// Register a connection and announce the user if this is their first one
    pub async fn connect(&self, principal: Principal) -> Connection {
        let mut state = self.state.write().await;
        let channel = state
            .companies
            .entry(principal.company_id)
            .or_insert_with(|| CompanyChannel {
                tx: broadcast::channel(self.capacity).0,
                online: HashMap::new(),
            });

        let presence = channel.tx.subscribe();
        let count = channel.online.entry(principal.user_id).or_insert(0);
        *count += 1;
        let id = Uuid::new_v4();

        if *count == 1 {
            let _ = channel.tx.send(Broadcast {
                origin: Some(id),
                event: ServerEvent::Presence {
                    user_id: principal.user_id,
                    online: true,
                },
            });
        }

        tracing::debug!(
            "Realtime connect {} for user {} ({} open)",
            id,
            principal.user_id,
            *count
        );

        Connection {
            id,
            presence,
            online_users: channel.online_users(),
        }
    }

    /// Drop a connection from every room and from presence
    pub async fn disconnect(&self, connection_id: Uuid, principal: Principal) {
        let mut state = self.state.write().await;

        let joined: Vec<Uuid> = state
            .rooms
            .iter()
            .filter(|(_, room)| room.connections.contains_key(&connection_id))
            .map(|(id, _)| *id)
            .collect();
        for conversation_id in joined {
            Self::leave_locked(&mut state, connection_id, conversation_id);
        }

        let mut empty = false;
        if let Some(channel) = state.companies.get_mut(&principal.company_id) {
            if let Some(count) = channel.online.get_mut(&principal.user_id) {
                *count -= 1;
                if *count == 0 {
                    channel.online.remove(&principal.user_id);
                    let _ = channel.tx.send(Broadcast {
                        origin: Some(connection_id),
                        event: ServerEvent::Presence {
                            user_id: principal.user_id,
                            online: false,
                        },
                    });
                }
            }
            empty = channel.online.is_empty();
        }
        if empty {
            state.companies.remove(&principal.company_id);
        }

        tracing::debug!("Realtime disconnect {} for user {}", connection_id, principal.user_id);
    }

    /// Subscribe a connection to a conversation room, creating the room if needed.
    /// Joining twice returns a fresh receiver without re-announcing the member.
    pub async fn join(
        &self,
        connection_id: Uuid,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> (broadcast::Receiver<Broadcast>, RoomSnapshot) {
        let mut state = self.state.write().await;
        let room = state.rooms.entry(conversation_id).or_insert_with(|| Room {
            tx: broadcast::channel(self.capacity).0,
            connections: HashMap::new(),
            typing: HashMap::new(),
        });

        let first_for_user = !room.has_user(user_id);
        room.connections.insert(connection_id, user_id);
        let rx = room.tx.subscribe();

        if first_for_user {
            room.send(
                Some(connection_id),
                ServerEvent::MemberJoined {
                    conversation_id,
                    user_id,
                },
            );
        }

        let snapshot = Self::snapshot(room, self.typing_ttl);
        (rx, snapshot)
    }

    /// Returns false when the connection was not in the room
    pub async fn leave(&self, connection_id: Uuid, conversation_id: Uuid) -> bool {
        let mut state = self.state.write().await;
        Self::leave_locked(&mut state, connection_id, conversation_id)
    }

    fn leave_locked(state: &mut HubState, connection_id: Uuid, conversation_id: Uuid) -> bool {
        let Some(room) = state.rooms.get_mut(&conversation_id) else {
            return false;
        };
        let Some(user_id) = room.connections.remove(&connection_id) else {
            return false;
        };

        if !room.has_user(user_id) {
            let was_typing = room.typing.remove(&user_id).is_some();
            if was_typing {
                room.send(
                    Some(connection_id),
                    ServerEvent::Typing {
                        conversation_id,
                        user_id,
                        is_typing: false,
                    },
                );
            }
            room.send(
                Some(connection_id),
                ServerEvent::MemberLeft {
                    conversation_id,
                    user_id,
                },
            );
        }

        if room.connections.is_empty() {
            state.rooms.remove(&conversation_id);
        }
        true
    }

    /// Drop every connection of `user_id` from the room after their membership is revoked
    pub async fn remove_member(&self, conversation_id: Uuid, user_id: Uuid) {
        let mut state = self.state.write().await;
        let Some(room) = state.rooms.get_mut(&conversation_id) else {
            return;
        };

        room.connections.retain(|_, u| *u != user_id);
        room.typing.remove(&user_id);
        // Sent after removal so remaining members see it; the removed user's
        // receivers are still subscribed and observe it too, then stop
        room.send(
            None,
            ServerEvent::MemberRemoved {
                conversation_id,
                user_id,
            },
        );

        if room.connections.is_empty() {
            state.rooms.remove(&conversation_id);
        }
    }

    /// Conversation deleted: tell everyone and drop the room
    pub async fn close_room(&self, conversation_id: Uuid) {
        let mut state = self.state.write().await;
        if let Some(room) = state.rooms.remove(&conversation_id) {
            for user_id in room.members() {
                room.send(
                    None,
                    ServerEvent::MemberRemoved {
                        conversation_id,
                        user_id,
                    },
                );
            }
        }
    }

    pub async fn is_joined(&self, connection_id: Uuid, conversation_id: Uuid) -> bool {
        let state = self.state.read().await;
        state
            .rooms
            .get(&conversation_id)
            .map(|room| room.connections.contains_key(&connection_id))
            .unwrap_or(false)
    }

    /// Fan an event out to a room. Returns how many receivers got it;
    /// zero when nobody is connected to the conversation.
    pub async fn publish(&self, conversation_id: Uuid, event: ServerEvent, origin: Option<Uuid>) -> usize {
        let state = self.state.read().await;
        match state.rooms.get(&conversation_id) {
            Some(room) => room.send(origin, event),
            None => 0,
        }
    }

    /// Record a typing change and broadcast it. Repeated `true` refreshes the
    /// timestamp without re-broadcasting; returns whether anything was sent.
    pub async fn set_typing(&self, conversation_id: Uuid, user_id: Uuid, is_typing: bool, origin: Option<Uuid>) -> bool {
        let mut state = self.state.write().await;
        let Some(room) = state.rooms.get_mut(&conversation_id) else {
            return false;
        };

        let changed = if is_typing {
            room.typing.insert(user_id, Instant::now()).is_none()
        } else {
            room.typing.remove(&user_id).is_some()
        };

        if changed {
            room.send(
                origin,
                ServerEvent::Typing {
                    conversation_id,
                    user_id,
                    is_typing,
                },
            );
        }
        changed
    }

    /// Clear typing flags older than the TTL, broadcasting a stop for each
    pub async fn expire_typing(&self) -> usize {
        let mut state = self.state.write().await;
        let ttl = self.typing_ttl;
        let mut expired = 0;

        for (conversation_id, room) in state.rooms.iter_mut() {
            let stale: Vec<Uuid> = room
                .typing
                .iter()
                .filter(|(_, since)| since.elapsed() >= ttl)
                .map(|(user, _)| *user)
                .collect();

            for user_id in stale {
                room.typing.remove(&user_id);
                room.send(
                    None,
                    ServerEvent::Typing {
                        conversation_id: *conversation_id,
                        user_id,
                        is_typing: false,
                    },
                );
                expired += 1;
            }
        }
        expired
    }

    /// Periodically run `expire_typing` until the hub is dropped
    pub fn spawn_typing_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let hub = Arc::downgrade(self);
        let period = (self.typing_ttl / 2).max(Duration::from_millis(250));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(hub) = hub.upgrade() else { break };
                let expired = hub.expire_typing().await;
                if expired > 0 {
                    tracing::trace!("Expired {} typing indicators", expired);
                }
            }
        })
    }

    pub async fn room_snapshot(&self, conversation_id: Uuid) -> Option<RoomSnapshot> {
        let state = self.state.read().await;
        state
            .rooms
            .get(&conversation_id)
            .map(|room| Self::snapshot(room, self.typing_ttl))
    }

    fn snapshot(room: &Room, ttl: Duration) -> RoomSnapshot {
        let mut typing: Vec<Uuid> = room
            .typing
            .iter()
            .filter(|(_, since)| since.elapsed() < ttl)
            .map(|(user, _)| *user)
            .collect();
        typing.sort();
        RoomSnapshot {
            online_members: room.members(),
            typing,
        }
    }

    pub async fn online_users(&self, company_id: Uuid) -> Vec<Uuid> {
        let state = self.state.read().await;
        state
            .companies
            .get(&company_id)
            .map(CompanyChannel::online_users)
            .unwrap_or_default()
    }

    pub async fn connection_count(&self, company_id: Uuid, user_id: Uuid) -> usize {
        let state = self.state.read().await;
        state
            .companies
            .get(&company_id)
            .and_then(|c| c.online.get(&user_id).copied())
            .unwrap_or(0)
    }

    pub async fn room_count(&self) -> usize {
        self.state.read().await.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::Role;

    fn hub() -> ChatHub {
        ChatHub::new(16, Duration::from_secs(5))
    }

    fn principal(company_id: Uuid) -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            company_id,
            role: Role::Employee,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<Broadcast>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(b) = rx.try_recv() {
            events.push(b.event);
        }
        events
    }

    #[tokio::test]
    async fn presence_counts_connections_per_user() {
        let hub = hub();
        let company = Uuid::new_v4();
        let ada = principal(company);

        let watcher = hub.connect(principal(company)).await;
        let mut presence = watcher.presence;

        let first = hub.connect(ada).await;
        let second = hub.connect(ada).await;
        assert_eq!(hub.connection_count(company, ada.user_id).await, 2);
        assert_eq!(
            drain(&mut presence),
            vec![ServerEvent::Presence {
                user_id: ada.user_id,
                online: true
            }]
        );

        hub.disconnect(first.id, ada).await;
        assert!(drain(&mut presence).is_empty());
        assert!(hub.online_users(company).await.contains(&ada.user_id));

        hub.disconnect(second.id, ada).await;
        assert_eq!(
            drain(&mut presence),
            vec![ServerEvent::Presence {
                user_id: ada.user_id,
                online: false
            }]
        );
        assert!(!hub.online_users(company).await.contains(&ada.user_id));
    }

    #[tokio::test]
    async fn presence_does_not_cross_companies() {
        let hub = hub();
        let watcher = hub.connect(principal(Uuid::new_v4())).await;
        let mut presence = watcher.presence;
        hub.connect(principal(Uuid::new_v4())).await;
        assert!(drain(&mut presence).is_empty());
    }

    #[tokio::test]
    async fn rooms_live_while_someone_is_joined() {
        let hub = hub();
        let company = Uuid::new_v4();
        let (ada, bob) = (principal(company), principal(company));
        let conversation = Uuid::new_v4();
        let ada_conn = hub.connect(ada).await;
        let bob_conn = hub.connect(bob).await;

        let (mut ada_rx, snapshot) = hub.join(ada_conn.id, ada.user_id, conversation).await;
        assert_eq!(snapshot.online_members, vec![ada.user_id]);
        assert_eq!(hub.room_count().await, 1);

        let (_bob_rx, snapshot) = hub.join(bob_conn.id, bob.user_id, conversation).await;
        assert_eq!(snapshot.online_members.len(), 2);

        let events = drain(&mut ada_rx);
        assert!(events.contains(&ServerEvent::MemberJoined {
            conversation_id: conversation,
            user_id: bob.user_id
        }));

        assert!(hub.leave(bob_conn.id, conversation).await);
        assert!(!hub.leave(bob_conn.id, conversation).await);
        assert!(drain(&mut ada_rx).contains(&ServerEvent::MemberLeft {
            conversation_id: conversation,
            user_id: bob.user_id
        }));

        hub.disconnect(ada_conn.id, ada).await;
        assert_eq!(hub.room_count().await, 0);
    }

    #[tokio::test]
    async fn second_tab_does_not_reannounce_member() {
        let hub = hub();
        let company = Uuid::new_v4();
        let (ada, bob) = (principal(company), principal(company));
        let conversation = Uuid::new_v4();

        let bob_conn = hub.connect(bob).await;
        let (mut bob_rx, _) = hub.join(bob_conn.id, bob.user_id, conversation).await;

        let tab1 = hub.connect(ada).await;
        let tab2 = hub.connect(ada).await;
        hub.join(tab1.id, ada.user_id, conversation).await;
        hub.join(tab2.id, ada.user_id, conversation).await;
        let joins = drain(&mut bob_rx)
            .into_iter()
            .filter(|e| matches!(e, ServerEvent::MemberJoined { .. }))
            .count();
        assert_eq!(joins, 1);

        hub.leave(tab1.id, conversation).await;
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn publish_reaches_joined_connections_only() {
        let hub = hub();
        let company = Uuid::new_v4();
        let ada = principal(company);
        let conversation = Uuid::new_v4();

        assert_eq!(hub.publish(conversation, ServerEvent::Pong, None).await, 0);

        let conn = hub.connect(ada).await;
        let (mut rx, _) = hub.join(conn.id, ada.user_id, conversation).await;
        drain(&mut rx);

        assert_eq!(hub.publish(conversation, ServerEvent::Pong, Some(conn.id)).await, 1);
        let received = rx.try_recv().unwrap();
        assert_eq!(received.origin, Some(conn.id));
        assert_eq!(received.event, ServerEvent::Pong);
    }

    #[tokio::test]
    async fn typing_is_deduplicated_and_cleared() {
        let hub = hub();
        let ada = principal(Uuid::new_v4());
        let conversation = Uuid::new_v4();
        let conn = hub.connect(ada).await;
        let (mut rx, _) = hub.join(conn.id, ada.user_id, conversation).await;
        drain(&mut rx);

        assert!(hub.set_typing(conversation, ada.user_id, true, Some(conn.id)).await);
        assert!(!hub.set_typing(conversation, ada.user_id, true, Some(conn.id)).await);
        assert_eq!(hub.room_snapshot(conversation).await.unwrap().typing, vec![ada.user_id]);

        assert!(hub.set_typing(conversation, ada.user_id, false, Some(conn.id)).await);
        assert!(!hub.set_typing(conversation, ada.user_id, false, Some(conn.id)).await);
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test]
    async fn stale_typing_expires() {
        let hub = ChatHub::new(16, Duration::from_millis(0));
        let ada = principal(Uuid::new_v4());
        let conversation = Uuid::new_v4();
        let conn = hub.connect(ada).await;
        let (mut rx, _) = hub.join(conn.id, ada.user_id, conversation).await;
        hub.set_typing(conversation, ada.user_id, true, None).await;
        drain(&mut rx);

        assert!(hub.room_snapshot(conversation).await.unwrap().typing.is_empty());
        assert_eq!(hub.expire_typing().await, 1);
        assert_eq!(
            drain(&mut rx),
            vec![ServerEvent::Typing {
                conversation_id: conversation,
                user_id: ada.user_id,
                is_typing: false
            }]
        );
    }

    #[tokio::test]
    async fn removed_members_lose_their_room_slot() {
        let hub = hub();
        let company = Uuid::new_v4();
        let (ada, bob) = (principal(company), principal(company));
        let conversation = Uuid::new_v4();
        let ada_conn = hub.connect(ada).await;
        let bob_conn = hub.connect(bob).await;
        let (mut ada_rx, _) = hub.join(ada_conn.id, ada.user_id, conversation).await;
        hub.join(bob_conn.id, bob.user_id, conversation).await;
        drain(&mut ada_rx);

        hub.remove_member(conversation, bob.user_id).await;
        assert!(!hub.is_joined(bob_conn.id, conversation).await);
        assert!(hub.is_joined(ada_conn.id, conversation).await);
        assert_eq!(
            drain(&mut ada_rx),
            vec![ServerEvent::MemberRemoved {
                conversation_id: conversation,
                user_id: bob.user_id
            }]
        );
    }
}
