use sqlx::PgPool;
use uuid::Uuid;

use crate::database::models::Task;
use crate::database::Repository;
use crate::error::ApiError;
use crate::handlers::protected::projects;

pub mod collection;
pub mod record;

pub use collection::get as tasks_get;
pub use collection::post as tasks_post;
pub use record::delete as task_delete;
pub use record::get as task_get;
pub use record::patch as task_patch;

pub(crate) fn repository(pool: &PgPool) -> Repository<Task> {
    Repository::new("tasks", "Task", pool.clone())
}

/// Tasks may only point at live projects of the same company
pub(crate) async fn ensure_project(pool: &PgPool, company_id: Uuid, project_id: Uuid) -> Result<(), ApiError> {
    if !projects::repository(pool).exists(company_id, project_id).await? {
        return Err(ApiError::invalid_field("project_id", "No such project in this company"));
    }
    Ok(())
}
