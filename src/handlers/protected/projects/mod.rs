use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::models::Project;
use crate::database::{DatabaseError, Repository};
use crate::error::ApiError;
use crate::permissions::{Grant, Principal};

pub mod collection;
pub mod members;
pub mod record;

pub use collection::get as projects_get;
pub use collection::post as projects_post;
pub use members::delete as project_member_delete;
pub use members::get as project_members_get;
pub use members::post as project_member_post;
pub use record::delete as project_delete;
pub use record::get as project_get;
pub use record::patch as project_patch;

pub(crate) fn repository(pool: &PgPool) -> Repository<Project> {
    Repository::new("projects", "Project", pool.clone())
}

#[derive(Debug, Serialize)]
pub struct ProjectWithMembers {
    #[serde(flatten)]
    pub project: Project,
    pub member_ids: Vec<Uuid>,
}

pub(crate) async fn member_ids(pool: &PgPool, project_id: Uuid) -> Result<Vec<Uuid>, DatabaseError> {
    let rows: Vec<(Uuid,)> = sqlx::query_as("SELECT user_id FROM project_members WHERE project_id = $1 ORDER BY added_at")
        .bind(project_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Load a project and check the grant against its owner and members
pub(crate) async fn load(
    pool: &PgPool,
    principal: &Principal,
    grant: &Grant,
    id: Uuid,
) -> Result<ProjectWithMembers, ApiError> {
    let project = repository(pool).find(principal.company_id, id).await?;
    let member_ids = member_ids(pool, project.id).await?;
    grant.check(principal, &project.ownership(&member_ids))?;
    Ok(ProjectWithMembers { project, member_ids })
}

/// `user_id` must be a live user of the company
pub(crate) async fn ensure_user(pool: &PgPool, company_id: Uuid, user_id: Uuid, field: &str) -> Result<(), ApiError> {
    let exists = crate::handlers::protected::users::repository(pool)
        .exists(company_id, user_id)
        .await?;
    if !exists {
        return Err(ApiError::invalid_field(field, "No such user in this company"));
    }
    Ok(())
}
