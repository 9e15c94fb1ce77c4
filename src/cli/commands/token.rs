use anyhow::{anyhow, bail};
use serde_json::json;

use crate::auth::issue_token;
use crate::cli::utils::{connect, output_success};
use crate::cli::OutputFormat;
use crate::config::config;
use crate::database::models::User;
use crate::services::CompanyService;
use crate::validation::normalize_email;

/// Sign a token for an existing user without their password
pub async fn handle(email: &str, company_slug: &str, output_format: OutputFormat) -> anyhow::Result<()> {
    let pool = connect().await?;
    let company = CompanyService::new(pool.clone())
        .find_by_slug(company_slug)
        .await?
        .ok_or_else(|| anyhow!("No company '{}'", company_slug))?;
    if !company.is_active {
        bail!("Company '{}' is inactive", company.slug);
    }

    let user: User = sqlx::query_as(
        "SELECT * FROM users
         WHERE company_id = $1 AND lower(email) = $2 AND deleted_at IS NULL",
    )
    .bind(company.id)
    .bind(normalize_email(email))
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| anyhow!("No user '{}' in '{}'", email, company.slug))?;
    if !user.is_active {
        bail!("User '{}' is inactive", user.email);
    }

    let (token, expires_in) = issue_token(&company.slug, &user, &config().security)?;
    match output_format {
        OutputFormat::Json => output_success(
            output_format,
            "Token issued",
            Some(json!({ "token": token, "expires_in": expires_in, "role": user.role })),
        ),
        // Bare token so it can be captured by a shell
        OutputFormat::Text => {
            println!("{}", token);
            Ok(())
        }
    }
}
