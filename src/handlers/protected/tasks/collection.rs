use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use uuid::Uuid;

use super::{ensure_project, repository};
use crate::database::models::{Task, TaskPriority, TaskStatus};
use crate::handlers::protected::{audit, projects::ensure_user};
use crate::middleware::{ApiResponse, ApiResult};
use crate::permissions::{Grant, Principal};
use crate::state::AppState;
use crate::types::{Page, Pagination};
use crate::validation::FieldErrors;

#[derive(Debug, Default, Deserialize)]
pub struct TaskFilter {
    pub project_id: Option<Uuid>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assignee_id: Option<Uuid>,
}

/// GET /api/tasks?project_id=&status=&priority=&assignee_id=
pub async fn get(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Query(page): Query<Pagination>,
    Query(filter): Query<TaskFilter>,
) -> ApiResult<Page<Task>> {
    let repo = repository(&state.pool);
    let mut qb = repo.select(principal.company_id);
    if grant.is_restricted() {
        qb.push(" AND (assignee_id = ").push_bind(principal.user_id);
        qb.push(" OR created_by = ").push_bind(principal.user_id).push(")");
    }
    if let Some(project_id) = filter.project_id {
        qb.push(" AND project_id = ").push_bind(project_id);
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(priority) = filter.priority {
        qb.push(" AND priority = ").push_bind(priority);
    }
    if let Some(assignee_id) = filter.assignee_id {
        qb.push(" AND assignee_id = ").push_bind(assignee_id);
    }

    let window = page.resolve(&state.config.query);
    let tasks = repo
        .fetch_page(qb, "due_on ASC NULLS LAST, created_at DESC", window)
        .await?;
    Ok(ApiResponse::success(Page::new(tasks, window)))
}

#[derive(Debug, Deserialize)]
pub struct CreateTask {
    pub title: String,
    pub description: Option<String>,
    pub project_id: Option<Uuid>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assignee_id: Option<Uuid>,
    pub due_on: Option<NaiveDate>,
}

/// POST /api/tasks
pub async fn post(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(grant): Extension<Grant>,
    Json(payload): Json<CreateTask>,
) -> ApiResult<Task> {
    let mut errors = FieldErrors::new();
    let title = errors.text("title", &payload.title, 300);
    let description = errors.optional_text("description", payload.description.as_deref(), 10_000);
    errors.finish()?;

    if let Some(project_id) = payload.project_id {
        ensure_project(&state.pool, principal.company_id, project_id).await?;
    }
    if let Some(assignee_id) = payload.assignee_id {
        ensure_user(&state.pool, principal.company_id, assignee_id, "assignee_id").await?;
    }

    let status = payload.status.unwrap_or(TaskStatus::Todo);
    let completed_at = (status == TaskStatus::Done).then(Utc::now);

    let task: Task = sqlx::query_as(
        "INSERT INTO tasks (company_id, project_id, title, description, status, priority, assignee_id, created_by, due_on, completed_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
         RETURNING *",
    )
    .bind(principal.company_id)
    .bind(payload.project_id)
    .bind(&title)
    .bind(&description)
    .bind(status)
    .bind(payload.priority.unwrap_or(TaskPriority::Normal))
    .bind(payload.assignee_id)
    .bind(principal.user_id)
    .bind(payload.due_on)
    .bind(completed_at)
    .fetch_one(&state.pool)
    .await?;

    audit(&state, &principal, &grant, task.id);
    Ok(ApiResponse::created(task))
}
