use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::database::models::Message;
use crate::database::DatabaseError;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Not a member of this conversation")]
    NotMember,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    InvalidMessage(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<sqlx::Error> for ChatError {
    fn from(err: sqlx::Error) -> Self {
        ChatError::Database(err.into())
    }
}

/// Persistence needed by the realtime session and the message endpoints
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn is_member(&self, company_id: Uuid, conversation_id: Uuid, user_id: Uuid) -> Result<bool, ChatError>;

    /// Persist a message; the body is already validated
    async fn create_message(
        &self,
        company_id: Uuid,
        conversation_id: Uuid,
        sender_id: Uuid,
        body: &str,
    ) -> Result<Message, ChatError>;

    /// Record `message_id` as the member's read position and return the read time
    async fn mark_read(
        &self,
        company_id: Uuid,
        conversation_id: Uuid,
        user_id: Uuid,
        message_id: Uuid,
    ) -> Result<DateTime<Utc>, ChatError>;
}

const MESSAGE_COLUMNS: &str = "id, company_id, conversation_id, sender_id, body, created_at, edited_at";

/// Unread means sent by someone else and ordered after the member's read
/// message by `(created_at, id)`. `last_read_at` is the receipt time and plays
/// no part. Expects `msg` for the counted message and `m` for the member row.
pub(crate) const UNREAD_MESSAGE_FILTER: &str = "msg.deleted_at IS NULL
    AND msg.sender_id <> m.user_id
    AND NOT EXISTS (
        SELECT 1 FROM messages r
         WHERE r.id = m.last_read_message_id
           AND (r.created_at, r.id) >= (msg.created_at, msg.id)
    )";

pub struct PgChatStore {
    pool: PgPool,
}

impl PgChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn is_member(&self, company_id: Uuid, conversation_id: Uuid, user_id: Uuid) -> Result<bool, ChatError> {
        let (found,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (
                SELECT 1 FROM conversation_members m
                JOIN conversations c ON c.id = m.conversation_id
                WHERE c.company_id = $1 AND c.id = $2 AND c.deleted_at IS NULL AND m.user_id = $3
            )",
        )
        .bind(company_id)
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn create_message(
        &self,
        company_id: Uuid,
        conversation_id: Uuid,
        sender_id: Uuid,
        body: &str,
    ) -> Result<Message, ChatError> {
        let mut tx = self.pool.begin().await?;

        let message: Message = sqlx::query_as(&format!(
            "INSERT INTO messages (company_id, conversation_id, sender_id, body)
             VALUES ($1, $2, $3, $4)
             RETURNING {}",
            MESSAGE_COLUMNS
        ))
        .bind(company_id)
        .bind(conversation_id)
        .bind(sender_id)
        .bind(body)
        .fetch_one(&mut *tx)
        .await?;

        // Sending implies the sender has read up to their own message
        sqlx::query(
            "UPDATE conversation_members SET last_read_message_id = $1, last_read_at = $2
             WHERE conversation_id = $3 AND user_id = $4",
        )
        .bind(message.id)
        .bind(message.created_at)
        .bind(conversation_id)
        .bind(sender_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET updated_at = now() WHERE id = $1")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(message)
    }

    async fn mark_read(
        &self,
        company_id: Uuid,
        conversation_id: Uuid,
        user_id: Uuid,
        message_id: Uuid,
    ) -> Result<DateTime<Utc>, ChatError> {
        let message: Option<(DateTime<Utc>,)> = sqlx::query_as(
            "SELECT created_at FROM messages
             WHERE company_id = $1 AND conversation_id = $2 AND id = $3 AND deleted_at IS NULL",
        )
        .bind(company_id)
        .bind(conversation_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        if message.is_none() {
            return Err(ChatError::NotFound("Message"));
        }

        let read_at = Utc::now();
        let result = sqlx::query(
            "UPDATE conversation_members SET last_read_message_id = $1, last_read_at = $2
             WHERE conversation_id = $3 AND user_id = $4",
        )
        .bind(message_id)
        .bind(read_at)
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ChatError::NotMember);
        }
        Ok(read_at)
    }
}

#[cfg(test)]
pub mod memory {
    //! In-memory `ChatStore` for session tests

    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemoryChatStore {
        members: Mutex<HashSet<(Uuid, Uuid)>>,
        messages: Mutex<Vec<Message>>,
        reads: Mutex<HashMap<(Uuid, Uuid), Uuid>>,
    }

    impl MemoryChatStore {
        pub fn with_members(conversation_id: Uuid, users: &[Uuid]) -> Self {
            let store = Self::default();
            for user in users {
                store.add_member(conversation_id, *user);
            }
            store
        }

        pub fn add_member(&self, conversation_id: Uuid, user_id: Uuid) {
            self.members.lock().unwrap().insert((conversation_id, user_id));
        }

        pub fn messages(&self) -> Vec<Message> {
            self.messages.lock().unwrap().clone()
        }

        pub fn last_read(&self, conversation_id: Uuid, user_id: Uuid) -> Option<Uuid> {
            self.reads.lock().unwrap().get(&(conversation_id, user_id)).copied()
        }

        /// Messages from others after the user's read message, in send order
        pub fn unread_count(&self, conversation_id: Uuid, user_id: Uuid) -> usize {
            let read = self.last_read(conversation_id, user_id);
            let messages = self.messages.lock().unwrap();
            let in_room = messages.iter().filter(|m| m.conversation_id == conversation_id);
            let read_position = read.and_then(|id| in_room.clone().position(|m| m.id == id));
            in_room
                .enumerate()
                .filter(|(i, m)| m.sender_id != user_id && read_position.map_or(true, |pos| *i > pos))
                .count()
        }
    }

    #[async_trait]
    impl ChatStore for MemoryChatStore {
        async fn is_member(&self, _company_id: Uuid, conversation_id: Uuid, user_id: Uuid) -> Result<bool, ChatError> {
            Ok(self.members.lock().unwrap().contains(&(conversation_id, user_id)))
        }

        async fn create_message(
            &self,
            company_id: Uuid,
            conversation_id: Uuid,
            sender_id: Uuid,
            body: &str,
        ) -> Result<Message, ChatError> {
            let message = Message {
                id: Uuid::new_v4(),
                company_id,
                conversation_id,
                sender_id,
                body: body.to_string(),
                created_at: Utc::now(),
                edited_at: None,
            };
            self.messages.lock().unwrap().push(message.clone());
            self.reads.lock().unwrap().insert((conversation_id, sender_id), message.id);
            Ok(message)
        }

        async fn mark_read(
            &self,
            _company_id: Uuid,
            conversation_id: Uuid,
            user_id: Uuid,
            message_id: Uuid,
        ) -> Result<DateTime<Utc>, ChatError> {
            let known = self
                .messages
                .lock()
                .unwrap()
                .iter()
                .any(|m| m.id == message_id && m.conversation_id == conversation_id);
            if !known {
                return Err(ChatError::NotFound("Message"));
            }
            self.reads.lock().unwrap().insert((conversation_id, user_id), message_id);
            Ok(Utc::now())
        }
    }
}
