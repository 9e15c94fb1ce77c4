use axum::{extract::State, Extension};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::auth::issue_token;
use crate::database::models::{Company, User};
use crate::middleware::{ApiResponse, ApiResult, ValidatedCompany};
use crate::permissions::{policy, Role};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct WhoAmI {
    pub user: User,
    pub company: Company,
    pub role: Role,
    /// `{resource: {action: scope}}` for every resource the role can touch
    pub permissions: Value,
}

#[derive(Debug, Serialize)]
pub struct RefreshedToken {
    pub token: String,
    pub expires_in: i64,
}

/// GET /api/auth/whoami - Current user, company and effective permissions
pub async fn whoami(
    Extension(user): Extension<User>,
    Extension(ValidatedCompany(company)): Extension<ValidatedCompany>,
) -> ApiResult<WhoAmI> {
    Ok(ApiResponse::success(WhoAmI {
        role: user.role,
        permissions: permission_matrix(user.role),
        user,
        company,
    }))
}

/// POST /api/auth/refresh - New token for the validated user
pub async fn refresh(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(ValidatedCompany(company)): Extension<ValidatedCompany>,
) -> ApiResult<RefreshedToken> {
    let (token, expires_in) = issue_token(&company.slug, &user, &state.config.security)?;
    tracing::debug!("Refreshed token for {}", user.email);
    Ok(ApiResponse::success(RefreshedToken { token, expires_in }))
}

fn permission_matrix(role: Role) -> Value {
    let mut resources = Map::new();
    for (resource, scopes) in policy::matrix_for(role) {
        let actions: Map<String, Value> = scopes
            .into_iter()
            .map(|(action, scope)| (to_key(&action), serde_json::to_value(scope).unwrap_or(Value::Null)))
            .collect();
        resources.insert(to_key(&resource), Value::Object(actions));
    }
    Value::Object(resources)
}

fn to_key<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(Value::String(s)) => s,
        _ => String::new(),
    }
}
