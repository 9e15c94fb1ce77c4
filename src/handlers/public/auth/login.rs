// handlers/public/auth/login.rs - POST /auth/login

use axum::{extract::State, Json};
use serde::Deserialize;

use super::SessionResponse;
use crate::auth::{issue_token, verify_password, AuthError};
use crate::database::models::{Company, User};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::state::AppState;
use crate::validation::normalize_email;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Company slug
    pub company: String,
    pub email: String,
    pub password: String,
}

/// POST /auth/login - Exchange credentials for a JWT
///
/// Unknown company, unknown email and wrong password all answer with the
/// same 401 so the endpoint cannot be used to probe accounts.
pub async fn post(State(state): State<AppState>, Json(payload): Json<LoginRequest>) -> ApiResult<SessionResponse> {
    let slug = payload.company.trim().to_lowercase();
    let email = normalize_email(&payload.email);

    let company: Option<Company> = sqlx::query_as(
        "SELECT id, name, slug, currency, is_active, created_at, updated_at
         FROM companies WHERE slug = $1 AND deleted_at IS NULL",
    )
    .bind(&slug)
    .fetch_optional(&state.pool)
    .await?;
    let company = company.ok_or(AuthError::InvalidCredentials)?;

    let user: Option<User> = sqlx::query_as(
        "SELECT * FROM users WHERE company_id = $1 AND lower(email) = $2 AND deleted_at IS NULL",
    )
    .bind(company.id)
    .bind(&email)
    .fetch_optional(&state.pool)
    .await?;
    let user = user.ok_or(AuthError::InvalidCredentials)?;

    let password = payload.password;
    let hash = user.password_hash.clone();
    let verified = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .unwrap_or(false);
    if !verified {
        tracing::info!("Failed login for {} in company '{}'", email, slug);
        return Err(AuthError::InvalidCredentials.into());
    }

    if !company.is_active || !user.is_active {
        tracing::info!("Login refused for disabled account {} in company '{}'", email, slug);
        return Err(ApiError::forbidden("Account is disabled"));
    }

    let user: User = sqlx::query_as("UPDATE users SET last_login_at = now() WHERE id = $1 RETURNING *")
        .bind(user.id)
        .fetch_one(&state.pool)
        .await?;

    let (token, expires_in) = issue_token(&company.slug, &user, &state.config.security)?;
    tracing::info!("User {} logged in to company '{}'", user.email, company.slug);

    Ok(ApiResponse::success(SessionResponse {
        token,
        expires_in,
        user,
        company,
    }))
}
