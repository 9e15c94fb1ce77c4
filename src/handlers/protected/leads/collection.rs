use axum::{
    extract::{Query, State},
    Extension, Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use super::repository;
use crate::database::models::{Lead, LeadStatus};
use crate::error::ApiError;
use crate::handlers::protected::{audit, projects::ensure_user};
use crate::middleware::{ApiResponse, ApiResult};
use crate::permissions::{Grant, Principal};
use crate::state::AppState;
use crate::types::{Page, Pagination};
use crate::validation::FieldErrors;

#[derive(Debug, Default, Deserialize)]
pub struct LeadFilter {
    pub status: Option<LeadStatus>,
    pub owner_id: Option<Uuid>,
    pub source: Option<String>,
    /// Only open (or only closed) leads
    pub open: Option<bool>,
}

/// GET /api/leads
pub async fn get(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Query(page): Query<Pagination>,
    Query(filter): Query<LeadFilter>,
) -> ApiResult<Page<Lead>> {
    let repo = repository(&state.pool);
    let mut qb = repo.select(principal.company_id);
    if grant.is_restricted() {
        qb.push(" AND owner_id = ").push_bind(principal.user_id);
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(owner_id) = filter.owner_id {
        qb.push(" AND owner_id = ").push_bind(owner_id);
    }
    if let Some(source) = filter.source {
        qb.push(" AND source = ").push_bind(source);
    }
    match filter.open {
        Some(true) => {
            qb.push(" AND status NOT IN ('won', 'lost')");
        }
        Some(false) => {
            qb.push(" AND status IN ('won', 'lost')");
        }
        None => {}
    }

    let window = page.resolve(&state.config.query);
    let leads = repo.fetch_page(qb, "updated_at DESC", window).await?;
    Ok(ApiResponse::success(Page::new(leads, window)))
}

#[derive(Debug, Deserialize)]
pub struct CreateLead {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub source: Option<String>,
    pub status: Option<LeadStatus>,
    pub value: Option<Decimal>,
    pub owner_id: Option<Uuid>,
    pub notes: Option<String>,
}

/// POST /api/leads - Owned by the creator unless `owner_id` is given
pub async fn post(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Json(payload): Json<CreateLead>,
) -> ApiResult<Lead> {
    let mut errors = FieldErrors::new();
    let name = errors.text("name", &payload.name, 200);
    let email = payload
        .email
        .as_deref()
        .filter(|e| !e.trim().is_empty())
        .map(|e| errors.email("email", e));
    let phone = errors.optional_text("phone", payload.phone.as_deref(), 50);
    let source = errors.optional_text("source", payload.source.as_deref(), 100);
    let notes = errors.optional_text("notes", payload.notes.as_deref(), 10_000);
    errors.money("value", payload.value);
    errors.finish()?;

    // Own-scope callers can only create leads they own
    let owner_id = match payload.owner_id {
        Some(owner_id) if grant.is_restricted() && owner_id != principal.user_id => {
            return Err(ApiError::forbidden("You can only create leads for yourself"))
        }
        Some(owner_id) => owner_id,
        None => principal.user_id,
    };
    ensure_user(&state.pool, principal.company_id, owner_id, "owner_id").await?;

    let lead: Lead = sqlx::query_as(
        "INSERT INTO leads (company_id, name, email, phone, source, status, value, owner_id, notes)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         RETURNING *",
    )
    .bind(principal.company_id)
    .bind(&name)
    .bind(&email)
    .bind(&phone)
    .bind(&source)
    .bind(payload.status.unwrap_or(LeadStatus::New))
    .bind(payload.value)
    .bind(owner_id)
    .bind(&notes)
    .fetch_one(&state.pool)
    .await?;

    audit(&state, &principal, &grant, lead.id);
    Ok(ApiResponse::created(lead))
}
