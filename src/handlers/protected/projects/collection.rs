use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use super::{ensure_user, repository};
use crate::database::models::{Project, ProjectStatus};
use crate::handlers::protected::audit;
use crate::middleware::{ApiResponse, ApiResult};
use crate::permissions::{Grant, Principal};
use crate::state::AppState;
use crate::types::{Page, Pagination};
use crate::validation::FieldErrors;

#[derive(Debug, Default, Deserialize)]
pub struct ProjectFilter {
    pub status: Option<ProjectStatus>,
    pub owner_id: Option<Uuid>,
}

/// GET /api/projects
pub async fn get(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Query(page): Query<Pagination>,
    Query(filter): Query<ProjectFilter>,
) -> ApiResult<Page<Project>> {
    let repo = repository(&state.pool);
    let mut qb = repo.select(principal.company_id);
    if grant.is_restricted() {
        qb.push(" AND (owner_id = ").push_bind(principal.user_id);
        qb.push(" OR id IN (SELECT project_id FROM project_members WHERE user_id = ")
            .push_bind(principal.user_id)
            .push("))");
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(owner_id) = filter.owner_id {
        qb.push(" AND owner_id = ").push_bind(owner_id);
    }

    let window = page.resolve(&state.config.query);
    let projects = repo.fetch_page(qb, "created_at DESC", window).await?;
    Ok(ApiResponse::success(Page::new(projects, window)))
}

#[derive(Debug, Deserialize)]
pub struct CreateProject {
    pub name: String,
    pub description: Option<String>,
    pub status: Option<ProjectStatus>,
    pub client_name: Option<String>,
    pub budget: Option<Decimal>,
    pub owner_id: Option<Uuid>,
    pub starts_on: Option<NaiveDate>,
    pub due_on: Option<NaiveDate>,
}

/// POST /api/projects - The creator owns the project unless `owner_id` says otherwise
pub async fn post(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Json(payload): Json<CreateProject>,
) -> ApiResult<Project> {
    let mut errors = FieldErrors::new();
    let name = errors.text("name", &payload.name, 200);
    let description = errors.optional_text("description", payload.description.as_deref(), 10_000);
    let client_name = errors.optional_text("client_name", payload.client_name.as_deref(), 200);
    errors.money("budget", payload.budget);
    if let (Some(starts), Some(due)) = (payload.starts_on, payload.due_on) {
        errors.check(starts <= due, "due_on", "must not be before starts_on");
    }
    errors.finish()?;

    let owner_id = payload.owner_id.unwrap_or(principal.user_id);
    ensure_user(&state.pool, principal.company_id, owner_id, "owner_id").await?;

    let project: Project = sqlx::query_as(
        "INSERT INTO projects (company_id, name, description, status, client_name, budget, owner_id, starts_on, due_on)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         RETURNING *",
    )
    .bind(principal.company_id)
    .bind(&name)
    .bind(&description)
    .bind(payload.status.unwrap_or(ProjectStatus::Planned))
    .bind(&client_name)
    .bind(payload.budget)
    .bind(owner_id)
    .bind(payload.starts_on)
    .bind(payload.due_on)
    .fetch_one(&state.pool)
    .await?;

    audit(&state, &principal, &grant, project.id);
    Ok(ApiResponse::created(project))
}
