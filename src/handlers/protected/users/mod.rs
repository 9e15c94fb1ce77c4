use sqlx::PgPool;

use crate::database::models::User;
use crate::database::Repository;

pub mod collection;
pub mod record;

pub use collection::get as users_get;
pub use collection::post as users_post;
pub use record::delete as user_delete;
pub use record::get as user_get;
pub use record::patch as user_patch;

pub(crate) fn repository(pool: &PgPool) -> Repository<User> {
    Repository::new("users", "User", pool.clone())
}
