use axum::{
    extract::{Path, State},
    Extension,
};
use uuid::Uuid;

use super::{ensure_user, load, member_ids};
use crate::error::ApiError;
use crate::handlers::protected::audit;
use crate::middleware::{ApiResponse, ApiResult};
use crate::permissions::{Grant, Principal};
use crate::state::AppState;

/// GET /api/projects/:id/members
pub async fn get(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<Uuid>> {
    Ok(ApiResponse::success(load(&state.pool, &principal, &grant, id).await?.member_ids))
}

/// POST /api/projects/:id/members/:user_id - Idempotent
pub async fn post(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Vec<Uuid>> {
    load(&state.pool, &principal, &grant, id).await?;
    ensure_user(&state.pool, principal.company_id, user_id, "user_id").await?;

    sqlx::query("INSERT INTO project_members (project_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
        .bind(id)
        .bind(user_id)
        .execute(&state.pool)
        .await?;

    audit(&state, &principal, &grant, id);
    Ok(ApiResponse::success(member_ids(&state.pool, id).await?))
}

/// DELETE /api/projects/:id/members/:user_id
pub async fn delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<()> {
    load(&state.pool, &principal, &grant, id).await?;

    let result = sqlx::query("DELETE FROM project_members WHERE project_id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(&state.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found(format!("User {} is not a member of project {}", user_id, id)));
    }

    audit(&state, &principal, &grant, id);
    Ok(ApiResponse::no_content())
}
