use sqlx::{PgPool, Postgres, Transaction};

use crate::auth::{hash_password, AuthError};
use crate::database::models::{company::slugify, Company, User};
use crate::database::DatabaseError;
use crate::error::ApiError;
use crate::permissions::Role;

#[derive(Debug, thiserror::Error)]
pub enum CompanyError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("Invalid company name: {0}")]
    InvalidName(String),
}

impl From<sqlx::Error> for CompanyError {
    fn from(err: sqlx::Error) -> Self {
        CompanyError::Database(err.into())
    }
}

impl From<CompanyError> for ApiError {
    fn from(err: CompanyError) -> Self {
        match err {
            CompanyError::Database(e) => e.into(),
            CompanyError::Auth(e) => e.into(),
            CompanyError::InvalidName(msg) => ApiError::invalid_field("company_name", msg),
        }
    }
}

/// Input for a new company and its first owner; fields are already validated
#[derive(Debug, Clone)]
pub struct NewCompany {
    pub name: String,
    pub currency: String,
    pub owner_email: String,
    pub owner_name: String,
    pub password: String,
}

pub struct CompanyService {
    pool: PgPool,
}

impl CompanyService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the company with a unique slug and its owner, in one transaction
    pub async fn register(&self, new: NewCompany, bcrypt_cost: u32) -> Result<(Company, User), CompanyError> {
        let base = slugify(&new.name);
        if base.is_empty() {
            return Err(CompanyError::InvalidName(
                "Company name must contain letters or digits".to_string(),
            ));
        }

        // bcrypt is deliberately slow; keep it off the async workers
        let password = new.password.clone();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password, bcrypt_cost))
            .await
            .map_err(|e| AuthError::Hashing(e.to_string()))??;

        let mut tx = self.pool.begin().await?;
        let slug = Self::available_slug(&mut tx, &base).await?;

        let company: Company = sqlx::query_as(
            "INSERT INTO companies (name, slug, currency)
             VALUES ($1, $2, $3)
             RETURNING id, name, slug, currency, is_active, created_at, updated_at",
        )
        .bind(new.name.trim())
        .bind(&slug)
        .bind(&new.currency)
        .fetch_one(&mut *tx)
        .await?;

        let owner: User = sqlx::query_as(
            "INSERT INTO users (company_id, email, name, password_hash, role)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING *",
        )
        .bind(company.id)
        .bind(&new.owner_email)
        .bind(&new.owner_name)
        .bind(&password_hash)
        .bind(Role::Owner)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!("Registered company '{}' ({}) with owner {}", company.slug, company.id, owner.email);
        Ok((company, owner))
    }

    pub async fn find_by_slug(&self, slug: &str) -> Result<Option<Company>, CompanyError> {
        let company = sqlx::query_as(
            "SELECT id, name, slug, currency, is_active, created_at, updated_at
             FROM companies WHERE slug = $1 AND deleted_at IS NULL",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        Ok(company)
    }

    /// First of `acme`, `acme-2`, `acme-3`, ... not taken yet. Registrations
    /// with the same base slug are serialized until commit.
    async fn available_slug(tx: &mut Transaction<'_, Postgres>, base: &str) -> Result<String, CompanyError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(slug_lock_key(base))
            .execute(&mut **tx)
            .await?;

        let taken: Vec<(String,)> = sqlx::query_as("SELECT slug FROM companies WHERE slug = $1 OR slug LIKE $2")
            .bind(base)
            .bind(format!("{}-%", base))
            .fetch_all(&mut **tx)
            .await?;
        let taken: Vec<String> = taken.into_iter().map(|(s,)| s).collect();
        Ok(first_free_slug(base, &taken))
    }
}

/// Namespaced so it cannot share a lock with invoice numbering
fn slug_lock_key(base: &str) -> String {
    format!("company-slug:{}", base)
}

fn first_free_slug(base: &str, taken: &[String]) -> String {
    if !taken.iter().any(|s| s == base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{}-{}", base, n))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_get_numeric_suffixes() {
        assert_eq!(first_free_slug("acme", &[]), "acme");
        let taken = vec!["acme".to_string(), "acme-2".to_string(), "acme-corp".to_string()];
        assert_eq!(first_free_slug("acme", &taken), "acme-3");
    }

    #[test]
    fn slug_locks_are_keyed_by_base() {
        assert_eq!(slug_lock_key("acme"), slug_lock_key("acme"));
        assert_ne!(slug_lock_key("acme"), slug_lock_key("acme-corp"));
        assert!(slug_lock_key("acme").starts_with("company-slug:"));
    }

    #[test]
    fn invalid_names_map_to_field_errors() {
        let err: ApiError = CompanyError::InvalidName("bad".to_string()).into();
        assert_eq!(err.to_json()["field_errors"]["company_name"], "bad");
    }
}
