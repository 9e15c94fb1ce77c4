use sqlx::PgPool;

use crate::database::models::Lead;
use crate::database::Repository;

pub mod collection;
pub mod record;

pub use collection::get as leads_get;
pub use collection::post as leads_post;
pub use record::delete as lead_delete;
pub use record::get as lead_get;
pub use record::patch as lead_patch;

pub(crate) fn repository(pool: &PgPool) -> Repository<Lead> {
    Repository::new("leads", "Lead", pool.clone())
}
