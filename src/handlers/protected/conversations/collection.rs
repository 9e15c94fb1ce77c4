use std::collections::BTreeSet;

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{members, ConversationWithMembers};
use crate::database::models::{Conversation, ConversationSummary};
use crate::error::ApiError;
use crate::handlers::protected::audit;
use crate::middleware::{ApiResponse, ApiResult};
use crate::permissions::{Grant, Principal};
use crate::realtime::store::UNREAD_MESSAGE_FILTER;
use crate::state::AppState;
use crate::types::{Page, Pagination};
use crate::validation::FieldErrors;

/// GET /api/conversations - the caller's conversations, most recently active first
pub async fn get(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(page): Query<Pagination>,
) -> ApiResult<Page<ConversationSummary>> {
    let (limit, offset) = page.resolve(&state.config.query);
    let conversations: Vec<ConversationSummary> = sqlx::query_as(&format!(
        "SELECT c.id, c.title, c.is_direct, c.created_by, c.created_at,
                (SELECT MAX(msg.created_at) FROM messages msg
                  WHERE msg.conversation_id = c.id AND msg.deleted_at IS NULL) AS last_message_at,
                (SELECT COUNT(*) FROM messages msg
                  WHERE msg.conversation_id = c.id AND {}) AS unread_count
         FROM conversations c
         JOIN conversation_members m ON m.conversation_id = c.id AND m.user_id = $2
         WHERE c.company_id = $1 AND c.deleted_at IS NULL
         ORDER BY last_message_at DESC NULLS LAST, c.created_at DESC
         LIMIT $3 OFFSET $4",
        UNREAD_MESSAGE_FILTER
    ))
    .bind(principal.company_id)
    .bind(principal.user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.pool)
    .await?;

    Ok(ApiResponse::success(Page::new(conversations, (limit, offset))))
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateConversation {
    pub title: Option<String>,
    #[serde(default)]
    pub member_ids: Vec<Uuid>,
    #[serde(default)]
    pub is_direct: bool,
}

/// Creator plus requested members, deduplicated and ordered
pub(crate) fn member_set(creator: Uuid, requested: &[Uuid]) -> Vec<Uuid> {
    let set: BTreeSet<Uuid> = requested.iter().copied().chain(std::iter::once(creator)).collect();
    set.into_iter().collect()
}

/// POST /api/conversations - a direct conversation that already exists is
/// returned as is, with 200 instead of 201
pub async fn post(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Json(payload): Json<CreateConversation>,
) -> ApiResult<ConversationWithMembers> {
    let member_ids = member_set(principal.user_id, &payload.member_ids);

    let mut errors = FieldErrors::new();
    let title = errors.optional_text("title", payload.title.as_deref(), 200);
    if payload.is_direct {
        errors.check(
            member_ids.len() == 2,
            "member_ids",
            "a direct conversation has exactly one other member",
        );
        errors.check(title.is_none(), "title", "direct conversations have no title");
    } else {
        errors.check(member_ids.len() >= 2, "member_ids", "add at least one other member");
    }
    errors.finish()?;

    let (known,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM users
         WHERE company_id = $1 AND id = ANY($2) AND is_active AND deleted_at IS NULL",
    )
    .bind(principal.company_id)
    .bind(&member_ids)
    .fetch_one(&state.pool)
    .await?;
    if known != member_ids.len() as i64 {
        return Err(ApiError::invalid_field("member_ids", "Every member must be an active user of this company"));
    }

    let direct_key = payload
        .is_direct
        .then(|| Conversation::direct_key(member_ids[0], member_ids[1]));

    let mut tx = state.pool.begin().await?;
    let inserted: Option<Conversation> = sqlx::query_as(
        "INSERT INTO conversations (company_id, title, is_direct, direct_key, created_by)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (company_id, direct_key) WHERE direct_key IS NOT NULL AND deleted_at IS NULL
         DO NOTHING
         RETURNING *",
    )
    .bind(principal.company_id)
    .bind(&title)
    .bind(payload.is_direct)
    .bind(&direct_key)
    .bind(principal.user_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(conversation) = inserted else {
        tx.rollback().await?;
        let existing: Conversation = sqlx::query_as(
            "SELECT * FROM conversations
             WHERE company_id = $1 AND direct_key = $2 AND deleted_at IS NULL",
        )
        .bind(principal.company_id)
        .bind(&direct_key)
        .fetch_one(&state.pool)
        .await?;
        let members = members(&state.pool, existing.id).await?;
        return Ok(ApiResponse::success(ConversationWithMembers {
            conversation: existing,
            members,
        }));
    };

    sqlx::query(
        "INSERT INTO conversation_members (conversation_id, user_id)
         SELECT $1, UNNEST($2::uuid[])",
    )
    .bind(conversation.id)
    .bind(&member_ids)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    let members = members(&state.pool, conversation.id).await?;
    tracing::debug!("Conversation {} created with {} members", conversation.id, members.len());
    audit(&state, &principal, &grant, conversation.id);
    Ok(ApiResponse::created(ConversationWithMembers { conversation, members }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creator_is_always_a_member() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let set = member_set(me, &[other, other, me]);
        assert_eq!(set.len(), 2);
        assert!(set.contains(&me) && set.contains(&other));
        assert_eq!(member_set(me, &[]), vec![me]);
    }

    #[test]
    fn create_body_defaults() {
        let body: CreateConversation = serde_json::from_str(r#"{"title": "Launch"}"#).unwrap();
        assert!(!body.is_direct);
        assert!(body.member_ids.is_empty());
    }
}
