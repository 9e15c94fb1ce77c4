use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::SecurityConfig;
use crate::database::models::User;
use crate::permissions::Role;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Company slug
    pub company: String,
    pub company_id: Uuid,
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(company: String, company_id: Uuid, user_id: Uuid, email: String, role: Role, expiry_hours: u64) -> Self {
        let now = Utc::now();
        let exp = (now + Duration::hours(expiry_hours as i64)).timestamp();

        Self {
            company,
            company_id,
            user_id,
            email,
            role,
            exp,
            iat: now.timestamp(),
        }
    }

    pub fn expires_in(&self) -> i64 {
        self.exp - self.iat
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("JWT generation error: {0}")]
    TokenGeneration(String),

    #[error("Invalid JWT secret")]
    InvalidSecret,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Password hashing failed: {0}")]
    Hashing(String),
}

pub fn generate_jwt(claims: &Claims, security: &SecurityConfig) -> Result<String, AuthError> {
    if security.jwt_secret.is_empty() {
        return Err(AuthError::InvalidSecret);
    }

    let encoding_key = EncodingKey::from_secret(security.jwt_secret.as_bytes());
    encode(&Header::default(), claims, &encoding_key).map_err(|e| AuthError::TokenGeneration(e.to_string()))
}

pub fn validate_jwt(token: &str, security: &SecurityConfig) -> Result<Claims, AuthError> {
    if security.jwt_secret.is_empty() {
        return Err(AuthError::InvalidSecret);
    }

    let decoding_key = DecodingKey::from_secret(security.jwt_secret.as_bytes());
    let token_data = decode::<Claims>(token, &decoding_key, &Validation::default())
        .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

    Ok(token_data.claims)
}

pub fn hash_password(password: &str, cost: u32) -> Result<String, AuthError> {
    bcrypt::hash(password, cost).map_err(|e| AuthError::Hashing(e.to_string()))
}

/// Signed token for `user`, plus its lifetime in seconds
pub fn issue_token(company_slug: &str, user: &User, security: &SecurityConfig) -> Result<(String, i64), AuthError> {
    let claims = Claims::new(
        company_slug.to_string(),
        user.company_id,
        user.id,
        user.email.clone(),
        user.role,
        security.jwt_expiry_hours,
    );
    let token = generate_jwt(&claims, security)?;
    Ok((token, claims.expires_in()))
}

/// Malformed stored hashes count as a mismatch
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, Environment};

    fn security() -> SecurityConfig {
        AppConfig::preset(Environment::Development).security
    }

    fn claims(hours: u64) -> Claims {
        Claims::new(
            "acme".to_string(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "ada@acme.test".to_string(),
            Role::Manager,
            hours,
        )
    }

    #[test]
    fn tokens_round_trip() {
        let security = security();
        let original = claims(2);
        let token = generate_jwt(&original, &security).unwrap();
        assert_eq!(validate_jwt(&token, &security).unwrap(), original);
        assert_eq!(original.expires_in(), 2 * 3600);
    }

    #[test]
    fn tokens_signed_with_another_secret_are_rejected() {
        let mut other = security();
        other.jwt_secret = "someone-else".to_string();
        let token = generate_jwt(&claims(1), &other).unwrap();
        assert!(matches!(validate_jwt(&token, &security()), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let security = security();
        let mut stale = claims(1);
        stale.iat -= 7200;
        stale.exp = stale.iat + 60;
        let token = generate_jwt(&stale, &security).unwrap();
        assert!(validate_jwt(&token, &security).is_err());
    }

    #[test]
    fn empty_secret_is_refused() {
        let mut security = security();
        security.jwt_secret.clear();
        assert!(matches!(generate_jwt(&claims(1), &security), Err(AuthError::InvalidSecret)));
    }

    #[test]
    fn passwords_verify_against_their_hash() {
        let hash = hash_password("correct horse", 4).unwrap();
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("battery staple", &hash));
        assert!(!verify_password("anything", "not-a-bcrypt-hash"));
    }
}
