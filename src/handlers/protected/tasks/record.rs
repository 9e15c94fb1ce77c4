use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use super::{ensure_project, repository};
use crate::database::models::{Task, TaskPriority, TaskStatus};
use crate::handlers::protected::{audit, projects::ensure_user};
use crate::middleware::{ApiResponse, ApiResult};
use crate::permissions::{Grant, Principal};
use crate::state::AppState;
use crate::types::double_option;
use crate::validation::FieldErrors;

/// GET /api/tasks/:id
pub async fn get(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path(id): Path<Uuid>,
) -> ApiResult<Task> {
    let task = repository(&state.pool).find(principal.company_id, id).await?;
    grant.check(&principal, &task.ownership())?;
    Ok(ApiResponse::success(task))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateTask {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub project_id: Option<Option<Uuid>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    #[serde(default, deserialize_with = "double_option")]
    pub assignee_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_on: Option<Option<NaiveDate>>,
}

/// PATCH /api/tasks/:id - Moving to `done` stamps `completed_at`, leaving it clears it
pub async fn patch(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateTask>,
) -> ApiResult<Task> {
    let current = repository(&state.pool).find(principal.company_id, id).await?;
    grant.check(&principal, &current.ownership())?;

    let mut errors = FieldErrors::new();
    let title = payload.title.as_deref().map(|t| errors.text("title", t, 300));
    let description = payload
        .description
        .as_ref()
        .map(|d| errors.optional_text("description", d.as_deref(), 10_000));
    errors.finish()?;

    if let Some(Some(project_id)) = payload.project_id {
        ensure_project(&state.pool, principal.company_id, project_id).await?;
    }
    if let Some(Some(assignee_id)) = payload.assignee_id {
        ensure_user(&state.pool, principal.company_id, assignee_id, "assignee_id").await?;
    }

    let mut qb = QueryBuilder::<Postgres>::new("UPDATE tasks SET updated_at = now()");
    if let Some(title) = title {
        qb.push(", title = ").push_bind(title);
    }
    if let Some(description) = description {
        qb.push(", description = ").push_bind(description);
    }
    if let Some(project_id) = payload.project_id {
        qb.push(", project_id = ").push_bind(project_id);
    }
    if let Some(status) = payload.status {
        qb.push(", status = ").push_bind(status);
        qb.push(", completed_at = ")
            .push_bind(current.completion_after(status, Utc::now()));
    }
    if let Some(priority) = payload.priority {
        qb.push(", priority = ").push_bind(priority);
    }
    if let Some(assignee_id) = payload.assignee_id {
        qb.push(", assignee_id = ").push_bind(assignee_id);
    }
    if let Some(due_on) = payload.due_on {
        qb.push(", due_on = ").push_bind(due_on);
    }
    qb.push(" WHERE company_id = ").push_bind(principal.company_id);
    qb.push(" AND id = ").push_bind(id);
    qb.push(" AND deleted_at IS NULL RETURNING *");

    let task: Task = qb.build_query_as().fetch_one(&state.pool).await?;
    audit(&state, &principal, &grant, task.id);
    Ok(ApiResponse::success(task))
}

/// DELETE /api/tasks/:id
pub async fn delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    let repo = repository(&state.pool);
    let task = repo.find(principal.company_id, id).await?;
    grant.check(&principal, &task.ownership())?;
    repo.delete(principal.company_id, id).await?;
    audit(&state, &principal, &grant, id);
    Ok(ApiResponse::no_content())
}
