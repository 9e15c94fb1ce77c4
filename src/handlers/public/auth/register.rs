// handlers/public/auth/register.rs - POST /auth/register

use axum::{extract::State, Json};
use serde::Deserialize;

use super::SessionResponse;
use crate::auth::issue_token;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::{CompanyService, NewCompany};
use crate::state::AppState;
use crate::validation::{FieldErrors, MIN_PASSWORD_LENGTH};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub company_name: String,
    pub currency: Option<String>,
    pub name: String,
    pub email: String,
    pub password: String,
}

impl RegisterRequest {
    fn validate(self) -> Result<NewCompany, crate::error::ApiError> {
        let mut errors = FieldErrors::new();
        let name = errors.text("company_name", &self.company_name, 120);
        let owner_name = errors.text("name", &self.name, 120);
        let owner_email = errors.email("email", &self.email);
        errors.check(
            self.password.chars().count() >= MIN_PASSWORD_LENGTH,
            "password",
            "must be at least 8 characters",
        );

        let currency = self
            .currency
            .as_deref()
            .map(|c| c.trim().to_uppercase())
            .unwrap_or_else(|| "USD".to_string());
        errors.check(
            currency.len() == 3 && currency.chars().all(|c| c.is_ascii_uppercase()),
            "currency",
            "must be a three-letter ISO code",
        );
        errors.finish()?;

        Ok(NewCompany {
            name,
            currency,
            owner_email,
            owner_name,
            password: self.password,
        })
    }
}

/// POST /auth/register - Create a company with its owner and sign the owner in
pub async fn post(State(state): State<AppState>, Json(payload): Json<RegisterRequest>) -> ApiResult<SessionResponse> {
    let new = payload.validate()?;
    let (company, user) = CompanyService::new(state.pool.clone())
        .register(new, state.config.security.bcrypt_cost)
        .await?;

    let (token, expires_in) = issue_token(&company.slug, &user, &state.config.security)?;
    Ok(ApiResponse::created(SessionResponse {
        token,
        expires_in,
        user,
        company,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RegisterRequest {
        RegisterRequest {
            company_name: " Acme Ltd ".to_string(),
            currency: Some("eur".to_string()),
            name: "Ada".to_string(),
            email: "Ada@Acme.test".to_string(),
            password: "long enough".to_string(),
        }
    }

    #[test]
    fn valid_requests_are_normalized() {
        let new = request().validate().unwrap();
        assert_eq!(new.name, "Acme Ltd");
        assert_eq!(new.currency, "EUR");
        assert_eq!(new.owner_email, "ada@acme.test");
    }

    #[test]
    fn short_passwords_and_bad_currencies_fail() {
        let mut req = request();
        req.password = "short".to_string();
        req.currency = Some("euro".to_string());
        let body = req.validate().unwrap_err().to_json();
        assert!(body["field_errors"]["password"].is_string());
        assert!(body["field_errors"]["currency"].is_string());
    }
}
