use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Deserialize;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use super::repository;
use crate::auth::hash_password;
use crate::database::models::User;
use crate::database::DatabaseError;
use crate::error::ApiError;
use crate::handlers::protected::audit;
use crate::middleware::{ApiResponse, ApiResult};
use crate::permissions::{Grant, Principal, Role};
use crate::services::user_service;
use crate::state::AppState;
use crate::validation::{FieldErrors, MIN_PASSWORD_LENGTH};

/// GET /api/users/:id
pub async fn get(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path(id): Path<Uuid>,
) -> ApiResult<User> {
    let user = repository(&state.pool).find(principal.company_id, id).await?;
    grant.check(&principal, &user.ownership())?;
    Ok(ApiResponse::success(user))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

impl UpdateUser {
    /// Fields a user may change on their own profile
    fn is_profile_only(&self) -> bool {
        self.role.is_none() && self.is_active.is_none()
    }
}

/// PATCH /api/users/:id
///
/// Own-scope callers (everyone below admin) may edit their name, email and
/// password. Role and activation changes need company scope.
pub async fn patch(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUser>,
) -> ApiResult<User> {
    let target = repository(&state.pool).find(principal.company_id, id).await?;
    grant.check(&principal, &target.ownership())?;
    if grant.is_restricted() && !payload.is_profile_only() {
        return Err(ApiError::forbidden("Only administrators can change roles or deactivate users"));
    }

    let mut errors = FieldErrors::new();
    let name = payload.name.as_deref().map(|n| errors.text("name", n, 120));
    let email = payload.email.as_deref().map(|e| errors.email("email", e));
    if let Some(password) = &payload.password {
        errors.check(
            password.chars().count() >= MIN_PASSWORD_LENGTH,
            "password",
            "must be at least 8 characters",
        );
    }
    errors.finish()?;

    if payload.is_active == Some(false) && target.id == principal.user_id {
        return Err(ApiError::unprocessable("You cannot deactivate your own account"));
    }

    // Hash before taking any locks
    let profile_only = payload.is_profile_only();
    let password_hash = match payload.password {
        Some(password) => {
            let cost = state.config.security.bcrypt_cost;
            let hash = tokio::task::spawn_blocking(move || hash_password(&password, cost))
                .await
                .map_err(|e| ApiError::internal_server_error(format!("Password hashing failed: {}", e)))??;
            Some(hash)
        }
        None => None,
    };

    let mut tx = state.pool.begin().await?;
    if !profile_only {
        // Owner rows first, then the target, in the same order as delete
        let owners = user_service::lock_owners(&mut tx, principal.company_id).await?;
        let target = user_service::lock_user(&mut tx, principal.company_id, id).await?;
        if let Some(role) = payload.role {
            user_service::check_role_change(&principal, target.id, target.role, role, &owners)?;
        }
        if payload.is_active == Some(false) && target.is_active {
            user_service::check_removal(&principal, target.id, target.role, &owners)?;
        }
    }

    let mut qb = QueryBuilder::<Postgres>::new("UPDATE users SET updated_at = now()");
    if let Some(name) = name {
        qb.push(", name = ").push_bind(name);
    }
    if let Some(email) = email {
        qb.push(", email = ").push_bind(email);
    }
    if let Some(hash) = password_hash {
        qb.push(", password_hash = ").push_bind(hash);
    }
    if let Some(role) = payload.role {
        qb.push(", role = ").push_bind(role);
    }
    if let Some(active) = payload.is_active {
        qb.push(", is_active = ").push_bind(active);
    }
    qb.push(" WHERE company_id = ").push_bind(principal.company_id);
    qb.push(" AND id = ").push_bind(id);
    qb.push(" AND deleted_at IS NULL RETURNING *");

    let user: User = qb
        .build_query_as()
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match DatabaseError::from(e) {
            DatabaseError::Conflict(_) => ApiError::conflict("Another user already has that email"),
            other => other.into(),
        })?;
    tx.commit().await?;

    audit(&state, &principal, &grant, user.id);
    Ok(ApiResponse::success(user))
}

/// DELETE /api/users/:id - Soft delete
pub async fn delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    let mut tx = state.pool.begin().await?;
    let owners = user_service::lock_owners(&mut tx, principal.company_id).await?;
    let target = user_service::lock_user(&mut tx, principal.company_id, id).await?;
    grant.check(&principal, &target.ownership())?;
    user_service::check_removal(&principal, target.id, target.role, &owners)?;

    sqlx::query("UPDATE users SET deleted_at = now(), updated_at = now() WHERE company_id = $1 AND id = $2")
        .bind(principal.company_id)
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    audit(&state, &principal, &grant, id);
    Ok(ApiResponse::no_content())
}
