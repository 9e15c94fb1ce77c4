use anyhow::bail;
use clap::Subcommand;
use serde_json::json;

use crate::cli::utils::{connect, output_error, output_success};
use crate::cli::OutputFormat;
use crate::config::config;
use crate::services::{CompanyService, NewCompany};
use crate::validation::{is_valid_email, normalize_email, MIN_PASSWORD_LENGTH};

#[derive(Subcommand)]
pub enum CompanyCommands {
    #[command(about = "Create a company and its owner account")]
    Create {
        #[arg(help = "Company name")]
        name: String,
        #[arg(long, help = "Owner email")]
        owner_email: String,
        #[arg(long, help = "Owner display name")]
        owner_name: String,
        #[arg(long, help = "Owner password")]
        password: String,
        #[arg(long, default_value = "USD", help = "Default currency")]
        currency: String,
    },

    #[command(about = "Show a company by slug")]
    Show {
        #[arg(help = "Company slug")]
        slug: String,
    },
}

pub async fn handle(cmd: CompanyCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        CompanyCommands::Create {
            name,
            owner_email,
            owner_name,
            password,
            currency,
        } => {
            let owner_email = normalize_email(&owner_email);
            if !is_valid_email(&owner_email) {
                bail!("'{}' is not a valid email address", owner_email);
            }
            if password.chars().count() < MIN_PASSWORD_LENGTH {
                bail!("password must be at least {} characters", MIN_PASSWORD_LENGTH);
            }

            let pool = connect().await?;
            let service = CompanyService::new(pool);
            let new = NewCompany {
                name,
                currency: currency.trim().to_ascii_uppercase(),
                owner_email,
                owner_name: owner_name.trim().to_string(),
                password,
            };
            let (company, owner) = service.register(new, config().security.bcrypt_cost).await?;

            output_success(
                output_format,
                &format!("Created company '{}' with owner {}", company.slug, owner.email),
                Some(json!({ "company": company, "owner": owner })),
            )
        }
        CompanyCommands::Show { slug } => {
            let pool = connect().await?;
            match CompanyService::new(pool).find_by_slug(&slug).await? {
                Some(company) => output_success(
                    output_format,
                    &format!("{} ({}) - {}", company.name, company.slug, company.id),
                    Some(serde_json::to_value(&company)?),
                ),
                None => output_error(output_format, &format!("No company '{}'", slug), Some("NOT_FOUND")),
            }
        }
    }
}
