//! Wire protocol for `/api/realtime`. Frames are JSON objects tagged by `type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::models::Message;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Join {
        conversation_id: Uuid,
    },
    Leave {
        conversation_id: Uuid,
    },
    Typing {
        conversation_id: Uuid,
        is_typing: bool,
    },
    Send {
        conversation_id: Uuid,
        body: String,
        /// Echoed back on `message_created` so clients can match optimistic sends
        #[serde(default)]
        client_id: Option<String>,
    },
    Read {
        conversation_id: Uuid,
        message_id: Uuid,
    },
    Ping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidEvent,
    InvalidMessage,
    Forbidden,
    NotJoined,
    NotFound,
    Lagged,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Welcome {
        connection_id: Uuid,
        online_users: Vec<Uuid>,
    },
    Joined {
        conversation_id: Uuid,
        online_members: Vec<Uuid>,
        typing: Vec<Uuid>,
    },
    Left {
        conversation_id: Uuid,
    },
    MemberJoined {
        conversation_id: Uuid,
        user_id: Uuid,
    },
    MemberLeft {
        conversation_id: Uuid,
        user_id: Uuid,
    },
    /// Membership revoked; the removed user's subscription ends after this
    MemberRemoved {
        conversation_id: Uuid,
        user_id: Uuid,
    },
    MessageCreated {
        message: Message,
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
    MessageUpdated {
        message: Message,
    },
    MessageDeleted {
        conversation_id: Uuid,
        message_id: Uuid,
    },
    Typing {
        conversation_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },
    ReadReceipt {
        conversation_id: Uuid,
        user_id: Uuid,
        message_id: Uuid,
        read_at: DateTime<Utc>,
    },
    Presence {
        user_id: Uuid,
        online: bool,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
    Pong,
}

impl ServerEvent {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code,
            message: message.into(),
        }
    }
}

/// What travels through a broadcast channel: the event plus the connection
/// that caused it, so that connection can skip its own echo where needed
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub origin: Option<Uuid>,
    pub event: ServerEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_events_parse_from_tagged_json() {
        let id = Uuid::new_v4();
        let event: ClientEvent =
            serde_json::from_value(json!({"type": "typing", "conversation_id": id, "is_typing": true})).unwrap();
        assert_eq!(
            event,
            ClientEvent::Typing {
                conversation_id: id,
                is_typing: true
            }
        );

        let send: ClientEvent =
            serde_json::from_value(json!({"type": "send", "conversation_id": id, "body": "hi"})).unwrap();
        assert!(matches!(send, ClientEvent::Send { client_id: None, .. }));

        assert_eq!(serde_json::from_value::<ClientEvent>(json!({"type": "ping"})).unwrap(), ClientEvent::Ping);
    }

    #[test]
    fn unknown_client_events_are_rejected() {
        assert!(serde_json::from_value::<ClientEvent>(json!({"type": "shout"})).is_err());
        assert!(serde_json::from_value::<ClientEvent>(json!({"type": "join"})).is_err());
    }

    #[test]
    fn server_events_serialize_with_type_tag() {
        let user_id = Uuid::new_v4();
        let value = serde_json::to_value(ServerEvent::Presence { user_id, online: true }).unwrap();
        assert_eq!(value, json!({"type": "presence", "user_id": user_id, "online": true}));

        let err = serde_json::to_value(ServerEvent::error(ErrorCode::NotJoined, "join first")).unwrap();
        assert_eq!(err["type"], "error");
        assert_eq!(err["code"], "not_joined");
    }
}
