use serde::Serialize;

use crate::database::models::{Company, User};

pub mod login;
pub mod register;

pub use login::post as login_post;
pub use register::post as register_post;

/// Body returned by login and registration
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub expires_in: i64,
    pub user: User,
    pub company: Company,
}
