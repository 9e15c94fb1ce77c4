use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use super::auth::AuthUser;
use crate::database::models::User;
use crate::error::ApiError;
use crate::state::AppState;

/// Middleware that validates the user from JWT claims against the users table.
/// Injects the `User` row and its `Principal`.
pub async fn validate_user_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_user = request
        .extensions()
        .get::<AuthUser>()
        .cloned()
        .ok_or_else(|| ApiError::unauthorized("JWT authentication required before user validation"))?;

    let user: Option<User> = sqlx::query_as(
        "SELECT * FROM users
         WHERE id = $1 AND company_id = $2 AND is_active = TRUE AND deleted_at IS NULL",
    )
    .bind(auth_user.user_id)
    .bind(auth_user.company_id)
    .fetch_optional(&state.pool)
    .await?;

    let user = user.ok_or_else(|| {
        tracing::warn!(
            "User validation failed: user '{}' ({}) not found or inactive in company '{}'",
            auth_user.email,
            auth_user.user_id,
            auth_user.company
        );
        ApiError::unauthorized(format!("User '{}' is not active", auth_user.email))
    })?;

    // A role change invalidates tokens issued before it
    if user.role != auth_user.role {
        tracing::warn!(
            "User validation failed: JWT role '{}' doesn't match database role '{}' for {}",
            auth_user.role,
            user.role,
            auth_user.email
        );
        return Err(ApiError::unauthorized("Role has changed, please log in again"));
    }

    tracing::debug!("User validation successful: {} ({}) in company '{}'", user.email, user.role, auth_user.company);

    request.extensions_mut().insert(user.principal());
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}
