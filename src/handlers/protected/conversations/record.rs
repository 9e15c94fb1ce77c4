use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{load, members, repository, ConversationWithMembers};
use crate::database::models::Conversation;
use crate::error::ApiError;
use crate::handlers::protected::audit;
use crate::middleware::{ApiResponse, ApiResult};
use crate::permissions::{Grant, Ownership, Principal};
use crate::realtime::ServerEvent;
use crate::state::AppState;
use crate::validation::FieldErrors;

/// GET /api/conversations/:id
pub async fn get(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path(id): Path<Uuid>,
) -> ApiResult<ConversationWithMembers> {
    let conversation = load(&state.pool, &principal, &grant, id).await?;
    Ok(ApiResponse::success(conversation))
}

#[derive(Debug, Deserialize)]
pub struct RenameConversation {
    pub title: Option<String>,
}

/// PATCH /api/conversations/:id - rename; any member may
pub async fn patch(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RenameConversation>,
) -> ApiResult<ConversationWithMembers> {
    let current = load(&state.pool, &principal, &grant, id).await?;
    if current.conversation.is_direct {
        return Err(ApiError::unprocessable("Direct conversations cannot be renamed"));
    }

    let mut errors = FieldErrors::new();
    let title = errors.optional_text("title", payload.title.as_deref(), 200);
    errors.finish()?;

    let conversation: Conversation = sqlx::query_as(
        "UPDATE conversations SET title = $1, updated_at = now()
         WHERE company_id = $2 AND id = $3 AND deleted_at IS NULL
         RETURNING *",
    )
    .bind(&title)
    .bind(principal.company_id)
    .bind(id)
    .fetch_one(&state.pool)
    .await?;

    audit(&state, &principal, &grant, id);
    Ok(ApiResponse::success(ConversationWithMembers {
        conversation,
        members: current.members,
    }))
}

/// DELETE /api/conversations/:id - the creator, or an admin, removes it for everyone
pub async fn delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    let repo = repository(&state.pool);
    let conversation = repo.find(principal.company_id, id).await?;
    grant.check(
        &principal,
        &Ownership::new(conversation.company_id).owned_by(conversation.created_by),
    )?;

    repo.delete(principal.company_id, id).await?;
    state.hub.close_room(id).await;

    audit(&state, &principal, &grant, id);
    Ok(ApiResponse::no_content())
}

#[derive(Debug, Deserialize)]
pub struct MarkRead {
    pub message_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ReadPosition {
    pub conversation_id: Uuid,
    pub message_id: Uuid,
    pub read_at: DateTime<Utc>,
}

/// POST /api/conversations/:id/read - persist the read position and tell the room
pub async fn read(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(payload): Json<MarkRead>,
) -> ApiResult<ReadPosition> {
    let read_at = state
        .chat_store
        .mark_read(principal.company_id, id, principal.user_id, payload.message_id)
        .await?;

    state
        .hub
        .publish(
            id,
            ServerEvent::ReadReceipt {
                conversation_id: id,
                user_id: principal.user_id,
                message_id: payload.message_id,
                read_at,
            },
            None,
        )
        .await;

    Ok(ApiResponse::success(ReadPosition {
        conversation_id: id,
        message_id: payload.message_id,
        read_at,
    }))
}

/// Members after a membership change, for responses
pub(crate) async fn reload(
    state: &AppState,
    conversation: Conversation,
) -> Result<ConversationWithMembers, ApiError> {
    let members = members(&state.pool, conversation.id).await?;
    Ok(ConversationWithMembers { conversation, members })
}
