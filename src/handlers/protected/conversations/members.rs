use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{load, record::reload, ConversationWithMembers};
use crate::error::ApiError;
use crate::handlers::protected::{audit, projects::ensure_user};
use crate::middleware::{ApiResponse, ApiResult};
use crate::permissions::{authorize, Action, Grant, Ownership, Principal, Resource};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AddMember {
    pub user_id: Uuid,
}

/// POST /api/conversations/:id/members - members may invite colleagues
pub async fn post(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddMember>,
) -> ApiResult<ConversationWithMembers> {
    let membership = authorize(&principal, Action::Update, Resource::Conversation)?;
    let current = load(&state.pool, &principal, &membership, id).await?;
    if current.conversation.is_direct {
        return Err(ApiError::unprocessable("Direct conversations always have two members"));
    }
    ensure_user(&state.pool, principal.company_id, payload.user_id, "user_id").await?;

    sqlx::query(
        "INSERT INTO conversation_members (conversation_id, user_id)
         VALUES ($1, $2)
         ON CONFLICT DO NOTHING",
    )
    .bind(id)
    .bind(payload.user_id)
    .execute(&state.pool)
    .await?;

    audit(&state, &principal, &grant, id);
    Ok(ApiResponse::success(reload(&state, current.conversation).await?))
}

/// DELETE /api/conversations/:id/members/:user_id - members may leave; removing
/// someone else takes the creator or an admin
pub async fn delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<()> {
    let membership = authorize(&principal, Action::Read, Resource::Conversation)?;
    let current = load(&state.pool, &principal, &membership, id).await?;
    if current.conversation.is_direct {
        return Err(ApiError::unprocessable("Direct conversations always have two members"));
    }
    if user_id != principal.user_id {
        grant.check(
            &principal,
            &Ownership::new(current.conversation.company_id).owned_by(current.conversation.created_by),
        )?;
    }

    let result = sqlx::query("DELETE FROM conversation_members WHERE conversation_id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(&state.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found(format!("User {} is not a member", user_id)));
    }
    state.hub.remove_member(id, user_id).await;

    audit(&state, &principal, &grant, id);
    Ok(ApiResponse::no_content())
}
