//! REST side of messaging. Every mutation that connected clients care
//! about is also published to the conversation's realtime room.

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::models::{Conversation, ConversationMember, Message};
use crate::database::{DatabaseError, Repository};
use crate::error::ApiError;
use crate::permissions::{Grant, Principal};

pub mod collection;
pub mod members;
pub mod messages;
pub mod record;

pub use collection::get as conversations_get;
pub use collection::post as conversations_post;
pub use members::delete as conversation_member_delete;
pub use members::post as conversation_member_post;
pub use messages::delete as message_delete;
pub use messages::get as messages_get;
pub use messages::patch as message_patch;
pub use messages::post as messages_post;
pub use record::delete as conversation_delete;
pub use record::get as conversation_get;
pub use record::patch as conversation_patch;
pub use record::read as conversation_read;

pub(crate) fn repository(pool: &PgPool) -> Repository<Conversation> {
    Repository::new("conversations", "Conversation", pool.clone())
}

#[derive(Debug, Serialize)]
pub struct ConversationWithMembers {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub members: Vec<ConversationMember>,
}

impl ConversationWithMembers {
    pub fn member_ids(&self) -> Vec<Uuid> {
        self.members.iter().map(|m| m.user_id).collect()
    }
}

pub(crate) async fn members(pool: &PgPool, conversation_id: Uuid) -> Result<Vec<ConversationMember>, DatabaseError> {
    let members = sqlx::query_as("SELECT * FROM conversation_members WHERE conversation_id = $1 ORDER BY joined_at")
        .bind(conversation_id)
        .fetch_all(pool)
        .await?;
    Ok(members)
}

/// Load a conversation with its members; the grant is checked against membership
pub(crate) async fn load(
    pool: &PgPool,
    principal: &Principal,
    grant: &Grant,
    id: Uuid,
) -> Result<ConversationWithMembers, ApiError> {
    let conversation = repository(pool).find(principal.company_id, id).await?;
    let members = members(pool, conversation.id).await?;
    let loaded = ConversationWithMembers { conversation, members };
    grant.check(principal, &loaded.conversation.ownership(&loaded.member_ids()))?;
    Ok(loaded)
}

const MESSAGE_COLUMNS: &str = "id, company_id, conversation_id, sender_id, body, created_at, edited_at";

/// A live message of the given conversation
pub(crate) async fn find_message(
    pool: &PgPool,
    company_id: Uuid,
    conversation_id: Uuid,
    message_id: Uuid,
) -> Result<Message, ApiError> {
    let message: Option<Message> = sqlx::query_as(&format!(
        "SELECT {} FROM messages
         WHERE company_id = $1 AND conversation_id = $2 AND id = $3 AND deleted_at IS NULL",
        MESSAGE_COLUMNS
    ))
    .bind(company_id)
    .bind(conversation_id)
    .bind(message_id)
    .fetch_optional(pool)
    .await?;
    message.ok_or_else(|| ApiError::not_found(format!("Message {} not found", message_id)))
}
