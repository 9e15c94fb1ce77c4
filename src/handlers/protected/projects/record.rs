use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use super::{ensure_user, load, member_ids, repository, ProjectWithMembers};
use crate::database::models::{Project, ProjectStatus};
use crate::handlers::protected::audit;
use crate::middleware::{ApiResponse, ApiResult};
use crate::permissions::{Grant, Principal};
use crate::state::AppState;
use crate::types::double_option;
use crate::validation::FieldErrors;

/// GET /api/projects/:id - Project with its member list
pub async fn get(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path(id): Path<Uuid>,
) -> ApiResult<ProjectWithMembers> {
    Ok(ApiResponse::success(load(&state.pool, &principal, &grant, id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProject {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub status: Option<ProjectStatus>,
    #[serde(default, deserialize_with = "double_option")]
    pub client_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub budget: Option<Option<Decimal>>,
    #[serde(default, deserialize_with = "double_option")]
    pub owner_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "double_option")]
    pub starts_on: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_on: Option<Option<NaiveDate>>,
}

/// PATCH /api/projects/:id
pub async fn patch(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateProject>,
) -> ApiResult<ProjectWithMembers> {
    let current = load(&state.pool, &principal, &grant, id).await?.project;

    let mut errors = FieldErrors::new();
    let name = payload.name.as_deref().map(|n| errors.text("name", n, 200));
    let description = payload
        .description
        .as_ref()
        .map(|d| errors.optional_text("description", d.as_deref(), 10_000));
    let client_name = payload
        .client_name
        .as_ref()
        .map(|c| errors.optional_text("client_name", c.as_deref(), 200));
    errors.money("budget", payload.budget.flatten());
    let starts_on = payload.starts_on.unwrap_or(current.starts_on);
    let due_on = payload.due_on.unwrap_or(current.due_on);
    if let (Some(starts), Some(due)) = (starts_on, due_on) {
        errors.check(starts <= due, "due_on", "must not be before starts_on");
    }
    errors.finish()?;

    if let Some(Some(owner_id)) = payload.owner_id {
        ensure_user(&state.pool, principal.company_id, owner_id, "owner_id").await?;
    }

    let mut qb = QueryBuilder::<Postgres>::new("UPDATE projects SET updated_at = now()");
    if let Some(name) = name {
        qb.push(", name = ").push_bind(name);
    }
    if let Some(description) = description {
        qb.push(", description = ").push_bind(description);
    }
    if let Some(status) = payload.status {
        qb.push(", status = ").push_bind(status);
    }
    if let Some(client_name) = client_name {
        qb.push(", client_name = ").push_bind(client_name);
    }
    if let Some(budget) = payload.budget {
        qb.push(", budget = ").push_bind(budget);
    }
    if let Some(owner_id) = payload.owner_id {
        qb.push(", owner_id = ").push_bind(owner_id);
    }
    if payload.starts_on.is_some() {
        qb.push(", starts_on = ").push_bind(starts_on);
    }
    if payload.due_on.is_some() {
        qb.push(", due_on = ").push_bind(due_on);
    }
    qb.push(" WHERE company_id = ").push_bind(principal.company_id);
    qb.push(" AND id = ").push_bind(id);
    qb.push(" AND deleted_at IS NULL RETURNING *");

    let project: Project = qb.build_query_as().fetch_one(&state.pool).await?;
    let member_ids = member_ids(&state.pool, project.id).await?;

    audit(&state, &principal, &grant, project.id);
    Ok(ApiResponse::success(ProjectWithMembers { project, member_ids }))
}

/// DELETE /api/projects/:id - Soft delete; tasks keep their project reference
pub async fn delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    load(&state.pool, &principal, &grant, id).await?;
    repository(&state.pool).delete(principal.company_id, id).await?;
    audit(&state, &principal, &grant, id);
    Ok(ApiResponse::no_content())
}
