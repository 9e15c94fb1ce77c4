use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{find_message, load, MESSAGE_COLUMNS};
use crate::database::models::Message;
use crate::handlers::protected::audit;
use crate::middleware::{ApiResponse, ApiResult};
use crate::permissions::{Grant, Principal};
use crate::realtime::{validate_body, ServerEvent};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct MessageCursor {
    /// Only messages older than this one
    pub before: Option<Uuid>,
    pub limit: Option<i64>,
}

/// GET /api/conversations/:id/messages?before=&limit= - newest first
pub async fn get(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path(id): Path<Uuid>,
    Query(cursor): Query<MessageCursor>,
) -> ApiResult<Vec<Message>> {
    load(&state.pool, &principal, &grant, id).await?;
    let query = &state.config.query;
    let limit = cursor.limit.unwrap_or(query.default_limit).clamp(1, query.max_limit);

    let messages: Vec<Message> = sqlx::query_as(&format!(
        "SELECT {} FROM messages
         WHERE company_id = $1 AND conversation_id = $2 AND deleted_at IS NULL
           AND ($3::uuid IS NULL OR (created_at, id) < (SELECT created_at, id FROM messages WHERE id = $3))
         ORDER BY created_at DESC, id DESC
         LIMIT $4",
        MESSAGE_COLUMNS
    ))
    .bind(principal.company_id)
    .bind(id)
    .bind(cursor.before)
    .bind(limit)
    .fetch_all(&state.pool)
    .await?;
    Ok(ApiResponse::success(messages))
}

#[derive(Debug, Deserialize)]
pub struct SendMessage {
    pub body: String,
    pub client_id: Option<String>,
}

/// POST /api/conversations/:id/messages - persist, then broadcast `message_created`
pub async fn post(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SendMessage>,
) -> ApiResult<Message> {
    load(&state.pool, &principal, &grant, id).await?;
    let body = validate_body(&payload.body, state.config.realtime.max_message_length)?;

    let message = state
        .chat_store
        .create_message(principal.company_id, id, principal.user_id, &body)
        .await?;

    state.hub.set_typing(id, principal.user_id, false, None).await;
    state
        .hub
        .publish(
            id,
            ServerEvent::MessageCreated {
                message: message.clone(),
                client_id: payload.client_id,
            },
            None,
        )
        .await;

    audit(&state, &principal, &grant, message.id);
    Ok(ApiResponse::created(message))
}

#[derive(Debug, Deserialize)]
pub struct EditMessage {
    pub body: String,
}

/// PATCH /api/conversations/:id/messages/:message_id - senders edit their own
pub async fn patch(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path((id, message_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<EditMessage>,
) -> ApiResult<Message> {
    let current = find_message(&state.pool, principal.company_id, id, message_id).await?;
    grant.check(&principal, &current.ownership())?;
    let body = validate_body(&payload.body, state.config.realtime.max_message_length)?;

    let message: Message = sqlx::query_as(&format!(
        "UPDATE messages SET body = $1, edited_at = now()
         WHERE company_id = $2 AND id = $3 AND deleted_at IS NULL
         RETURNING {}",
        MESSAGE_COLUMNS
    ))
    .bind(&body)
    .bind(principal.company_id)
    .bind(message_id)
    .fetch_one(&state.pool)
    .await?;

    state
        .hub
        .publish(id, ServerEvent::MessageUpdated { message: message.clone() }, None)
        .await;

    audit(&state, &principal, &grant, message_id);
    Ok(ApiResponse::success(message))
}

/// DELETE /api/conversations/:id/messages/:message_id - soft delete
pub async fn delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path((id, message_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<()> {
    let message = find_message(&state.pool, principal.company_id, id, message_id).await?;
    grant.check(&principal, &message.ownership())?;

    sqlx::query("UPDATE messages SET deleted_at = now() WHERE company_id = $1 AND id = $2")
        .bind(principal.company_id)
        .bind(message_id)
        .execute(&state.pool)
        .await?;

    state
        .hub
        .publish(
            id,
            ServerEvent::MessageDeleted {
                conversation_id: id,
                message_id,
            },
            None,
        )
        .await;

    audit(&state, &principal, &grant, message_id);
    Ok(ApiResponse::no_content())
}
