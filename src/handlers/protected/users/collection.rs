use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::Deserialize;

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
use crate::types::{Page, Pagination};
use crate::validation::{FieldErrors, MIN_PASSWORD_LENGTH};

#[derive(Debug, Default, Deserialize)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    /// Case-insensitive match on name or email
    pub q: Option<String>,
}

/// GET /api/users - Company directory
pub async fn get(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(page): Query<Pagination>,
    Query(filter): Query<UserFilter>,
) -> ApiResult<Page<User>> {
    let repo = repository(&state.pool);
    let mut qb = repo.select(principal.company_id);
    if let Some(role) = filter.role {
        qb.push(" AND role = ").push_bind(role);
    }
    if let Some(active) = filter.is_active {
        qb.push(" AND is_active = ").push_bind(active);
    }
    if let Some(q) = filter.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = format!("%{}%", q.replace('%', "\\%").replace('_', "\\_"));
        qb.push(" AND (name ILIKE ").push_bind(pattern.clone());
        qb.push(" OR email ILIKE ").push_bind(pattern).push(")");
    }

    let window = page.resolve(&state.config.query);
    let users = repo.fetch_page(qb, "name, email", window).await?;
    Ok(ApiResponse::success(Page::new(users, window)))
}

#[derive(Debug, Deserialize)]
pub struct CreateUser {
    pub email: String,
    pub name: String,
    pub role: Role,
    pub password: String,
}

/// POST /api/users - Invite a user with an initial password
pub async fn post(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Json(payload): Json<CreateUser>,
) -> ApiResult<User> {
    let mut errors = FieldErrors::new();
    let email = errors.email("email", &payload.email);
    let name = errors.text("name", &payload.name, 120);
    errors.check(
        payload.password.chars().count() >= MIN_PASSWORD_LENGTH,
        "password",
        "must be at least 8 characters",
    );
    errors.finish()?;
    user_service::check_role_grant(&principal, payload.role)?;

    let cost = state.config.security.bcrypt_cost;
    let password = payload.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password, cost))
        .await
        .map_err(|e| ApiError::internal_server_error(format!("Password hashing failed: {}", e)))??;

    let user: User = sqlx::query_as(
        "INSERT INTO users (company_id, email, name, password_hash, role)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING *",
    )
    .bind(principal.company_id)
    .bind(&email)
    .bind(&name)
    .bind(&password_hash)
    .bind(payload.role)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| match DatabaseError::from(e) {
        DatabaseError::Conflict(_) => ApiError::conflict(format!("A user with email {} already exists", email)),
        other => other.into(),
    })?;

    audit(&state, &principal, &grant, user.id);
    Ok(ApiResponse::created(user))
}
