use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use super::auth::AuthUser;
use crate::database::models::Company;
use crate::error::ApiError;
use crate::state::AppState;

/// The caller's company, confirmed active
#[derive(Clone, Debug)]
pub struct ValidatedCompany(pub Company);

/// Middleware that checks the company named in the JWT still exists and is active
pub async fn validate_company_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_user = request
        .extensions()
        .get::<AuthUser>()
        .cloned()
        .ok_or_else(|| ApiError::unauthorized("JWT authentication required before company validation"))?;

    let company: Option<Company> = sqlx::query_as(
        "SELECT id, name, slug, currency, is_active, created_at, updated_at
         FROM companies
         WHERE id = $1 AND is_active = TRUE AND deleted_at IS NULL",
    )
    .bind(auth_user.company_id)
    .fetch_optional(&state.pool)
    .await?;

    let company = company.ok_or_else(|| {
        tracing::warn!("Company validation failed: company '{}' not found or inactive", auth_user.company);
        ApiError::unauthorized(format!("Company '{}' is not active", auth_user.company))
    })?;

    if company.slug != auth_user.company {
        tracing::warn!(
            "Company validation failed: JWT company '{}' doesn't match '{}'",
            auth_user.company,
            company.slug
        );
        return Err(ApiError::unauthorized("Company mismatch"));
    }

    request.extensions_mut().insert(ValidatedCompany(company));
    Ok(next.run(request).await)
}
