use axum::{extract::State, Extension, Json};
use serde::Deserialize;

use super::{audit, invoices::normalize_currency};
use crate::database::models::Company;
use crate::middleware::{ApiResponse, ApiResult, ValidatedCompany};
use crate::permissions::{Grant, Ownership, Principal};
use crate::state::AppState;
use crate::validation::FieldErrors;

/// GET /api/company
pub async fn get(
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Extension(ValidatedCompany(company)): Extension<ValidatedCompany>,
) -> ApiResult<Company> {
    grant.check(&principal, &Ownership::new(company.id))?;
    Ok(ApiResponse::success(company))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateCompany {
    pub name: Option<String>,
    pub currency: Option<String>,
}

/// PATCH /api/company - the slug stays fixed so existing logins keep working
pub async fn patch(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Extension(ValidatedCompany(company)): Extension<ValidatedCompany>,
    Json(payload): Json<UpdateCompany>,
) -> ApiResult<Company> {
    grant.check(&principal, &Ownership::new(company.id))?;

    let mut errors = FieldErrors::new();
    let name = payload.name.as_deref().map(|n| errors.text("name", n, 200));
    let currency = payload.currency.as_deref().and_then(|code| {
        let normalized = normalize_currency(code);
        errors.check(normalized.is_some(), "currency", "must be a three-letter currency code");
        normalized
    });
    errors.finish()?;

    let updated: Company = sqlx::query_as(
        "UPDATE companies
         SET name = COALESCE($1, name), currency = COALESCE($2, currency), updated_at = now()
         WHERE id = $3 AND deleted_at IS NULL
         RETURNING id, name, slug, currency, is_active, created_at, updated_at",
    )
    .bind(&name)
    .bind(&currency)
    .bind(company.id)
    .fetch_one(&state.pool)
    .await?;

    audit(&state, &principal, &grant, company.id);
    Ok(ApiResponse::success(updated))
}

/// DELETE /api/company - closes the company; every token stops working
pub async fn delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Extension(ValidatedCompany(company)): Extension<ValidatedCompany>,
) -> ApiResult<()> {
    grant.check(&principal, &Ownership::new(company.id))?;

    sqlx::query("UPDATE companies SET is_active = FALSE, deleted_at = now(), updated_at = now() WHERE id = $1")
        .bind(company.id)
        .execute(&state.pool)
        .await?;
    tracing::warn!("Company '{}' ({}) closed by {}", company.slug, company.id, principal.user_id);

    audit(&state, &principal, &grant, company.id);
    Ok(ApiResponse::no_content())
}
