use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgPool};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::config::DatabaseConfig;

/// Errors from database access
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Sqlx(sqlx::Error),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let code = db_err.code().map(|c| c.into_owned());
            let constraint = db_err.constraint().map(str::to_string);

            // Postgres SQLSTATE: 23505 unique_violation, 23503 foreign_key_violation
            match code.as_deref() {
                Some("23505") => {
                    return DatabaseError::Conflict(match constraint {
                        Some(c) => format!("Duplicate value violates {}", c),
                        None => "Duplicate value".to_string(),
                    })
                }
                Some("23503") => {
                    return DatabaseError::InvalidReference(
                        constraint.as_deref().map(constraint_field).unwrap_or("reference").to_string(),
                    )
                }
                _ => {}
            }
        }

        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Record not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::ConnectionError(err.to_string())
            }
            other => DatabaseError::Sqlx(other),
        }
    }
}

/// `tasks_project_id_fkey` → `project_id`
fn constraint_field(constraint: &str) -> &str {
    let trimmed = constraint.strip_suffix("_fkey").unwrap_or(constraint);
    match trimmed.split_once('_') {
        Some((_, field)) => field,
        None => trimmed,
    }
}

/// Builds and checks the application connection pool
pub struct DatabaseManager;

impl DatabaseManager {
    /// Connect eagerly; fails fast when the database is unreachable
    pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
        let url = Self::database_url(config)?;
        let pool = Self::pool_options(config)
            .connect_with(Self::connect_options(config, &url)?)
            .await?;
        info!("Connected to database {}", Self::redacted(&url));
        Ok(pool)
    }

    /// Build a pool that only connects on first use
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
        let url = Self::database_url(config)?;
        let pool = Self::pool_options(config).connect_lazy_with(Self::connect_options(config, &url)?);
        info!("Database pool configured for {}", Self::redacted(&url));
        Ok(pool)
    }

    fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_secs))
    }

    fn connect_options(config: &DatabaseConfig, url: &str) -> Result<PgConnectOptions, DatabaseError> {
        let options: PgConnectOptions = url.parse()?;
        Ok(if config.enable_query_logging {
            options
        } else {
            options.disable_statement_logging()
        })
    }

    fn database_url(config: &DatabaseConfig) -> Result<String, DatabaseError> {
        if config.url.trim().is_empty() {
            return Err(DatabaseError::ConfigMissing("DATABASE_URL"));
        }
        Ok(config.url.clone())
    }

    /// Apply embedded migrations from ./migrations
    pub async fn migrate(pool: &PgPool) -> Result<(), DatabaseError> {
        sqlx::migrate!("./migrations").run(pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Pings the pool to ensure connectivity
    pub async fn health_check(pool: &PgPool) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(pool).await?;
        Ok(())
    }

    /// Connection string safe for logs (password removed)
    pub fn redacted(raw: &str) -> String {
        match url::Url::parse(raw) {
            Ok(mut url) => {
                if url.password().is_some() {
                    let _ = url.set_password(Some("***"));
                }
                url.to_string()
            }
            Err(_) => "<invalid database url>".to_string(),
        }
    }
}
