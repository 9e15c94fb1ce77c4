pub mod auth;
pub mod permission;
pub mod response;
pub mod validate_company;
pub mod validate_user;

pub use auth::{jwt_auth_middleware, AuthUser};
pub use permission::require_permission;
pub use response::{ApiResponse, ApiResult};
pub use validate_company::{validate_company_middleware, ValidatedCompany};
pub use validate_user::validate_user_middleware;
