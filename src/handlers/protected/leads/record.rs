use axum::{
    extract::{Path, State},
    Extension, Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use super::repository;
use crate::database::models::{Lead, LeadStatus};
use crate::error::ApiError;
use crate::handlers::protected::{audit, projects::ensure_user};
use crate::middleware::{ApiResponse, ApiResult};
use crate::permissions::{Grant, Principal};
use crate::state::AppState;
use crate::types::double_option;
use crate::validation::FieldErrors;

/// GET /api/leads/:id
pub async fn get(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path(id): Path<Uuid>,
) -> ApiResult<Lead> {
    let lead = repository(&state.pool).find(principal.company_id, id).await?;
    grant.check(&principal, &lead.ownership())?;
    Ok(ApiResponse::success(lead))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateLead {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub source: Option<Option<String>>,
    pub status: Option<LeadStatus>,
    #[serde(default, deserialize_with = "double_option")]
    pub value: Option<Option<Decimal>>,
    pub owner_id: Option<Uuid>,
    #[serde(default, deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
}

/// PATCH /api/leads/:id
pub async fn patch(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLead>,
) -> ApiResult<Lead> {
    let current = repository(&state.pool).find(principal.company_id, id).await?;
    grant.check(&principal, &current.ownership())?;

    let mut errors = FieldErrors::new();
    let name = payload.name.as_deref().map(|n| errors.text("name", n, 200));
    let email = payload.email.as_ref().map(|e| match e.as_deref().map(str::trim) {
        Some(e) if !e.is_empty() => Some(errors.email("email", e)),
        _ => None,
    });
    let phone = payload.phone.as_ref().map(|p| errors.optional_text("phone", p.as_deref(), 50));
    let source = payload.source.as_ref().map(|s| errors.optional_text("source", s.as_deref(), 100));
    let notes = payload.notes.as_ref().map(|n| errors.optional_text("notes", n.as_deref(), 10_000));
    errors.money("value", payload.value.flatten());
    errors.finish()?;

    if let Some(owner_id) = payload.owner_id {
        if grant.is_restricted() && owner_id != principal.user_id {
            return Err(ApiError::forbidden("Only managers can reassign leads"));
        }
        ensure_user(&state.pool, principal.company_id, owner_id, "owner_id").await?;
    }

    let mut qb = QueryBuilder::<Postgres>::new("UPDATE leads SET updated_at = now()");
    if let Some(name) = name {
        qb.push(", name = ").push_bind(name);
    }
    if let Some(email) = email {
        qb.push(", email = ").push_bind(email);
    }
    if let Some(phone) = phone {
        qb.push(", phone = ").push_bind(phone);
    }
    if let Some(source) = source {
        qb.push(", source = ").push_bind(source);
    }
    if let Some(status) = payload.status {
        qb.push(", status = ").push_bind(status);
    }
    if let Some(value) = payload.value {
        qb.push(", value = ").push_bind(value);
    }
    if let Some(owner_id) = payload.owner_id {
        qb.push(", owner_id = ").push_bind(owner_id);
    }
    if let Some(notes) = notes {
        qb.push(", notes = ").push_bind(notes);
    }
    qb.push(" WHERE company_id = ").push_bind(principal.company_id);
    qb.push(" AND id = ").push_bind(id);
    qb.push(" AND deleted_at IS NULL RETURNING *");

    let lead: Lead = qb.build_query_as().fetch_one(&state.pool).await?;
    if payload.status.is_some_and(|s| s.is_closed()) && !current.status.is_closed() {
        tracing::info!("Lead {} closed as {:?}", lead.id, lead.status);
    }

    audit(&state, &principal, &grant, lead.id);
    Ok(ApiResponse::success(lead))
}

/// DELETE /api/leads/:id
pub async fn delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    let repo = repository(&state.pool);
    let lead = repo.find(principal.company_id, id).await?;
    grant.check(&principal, &lead.ownership())?;
    repo.delete(principal.company_id, id).await?;
    audit(&state, &principal, &grant, id);
    Ok(ApiResponse::no_content())
}
