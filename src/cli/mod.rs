//! `bizhub` operator CLI: migrations, company bootstrap, dev tokens and
//! health probes.

pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "bizhub")]
#[command(about = "BizHub CLI - operator tooling for the BizHub API")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in human-readable text format")]
    pub text: bool,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Apply pending database migrations")]
    Migrate,

    #[command(about = "Company management")]
    Company {
        #[command(subcommand)]
        cmd: commands::company::CompanyCommands,
    },

    #[command(about = "Issue an access token for a user (development)")]
    Token {
        #[arg(help = "User email")]
        email: String,
        #[arg(long, help = "Company slug")]
        company: String,
    },

    #[command(about = "Check server health via the /health endpoint")]
    Health {
        #[arg(long, default_value = "http://localhost:3000", help = "Server base URL")]
        url: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::Migrate => commands::migrate::handle(output_format).await,
        Commands::Company { cmd } => commands::company::handle(cmd, output_format).await,
        Commands::Token { email, company } => commands::token::handle(&email, &company, output_format).await,
        Commands::Health { url } => commands::health::handle(&url, output_format).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_company_create() {
        let cli = Cli::try_parse_from([
            "bizhub",
            "--json",
            "company",
            "create",
            "Acme Corp",
            "--owner-email",
            "ada@acme.test",
            "--owner-name",
            "Ada",
            "--password",
            "correct horse",
        ])
        .unwrap();
        assert_eq!(OutputFormat::from_cli(&cli), OutputFormat::Json);
        match cli.command {
            Commands::Company {
                cmd: commands::company::CompanyCommands::Create { name, currency, .. },
            } => {
                assert_eq!(name, "Acme Corp");
                assert_eq!(currency, "USD");
            }
            _ => panic!("expected company create"),
        }
    }

    #[test]
    fn token_requires_company() {
        assert!(Cli::try_parse_from(["bizhub", "token", "ada@acme.test"]).is_err());
        let cli = Cli::try_parse_from(["bizhub", "token", "ada@acme.test", "--company", "acme"]).unwrap();
        assert!(matches!(cli.command, Commands::Token { ref company, .. } if company == "acme"));
    }

    #[test]
    fn health_defaults_to_localhost() {
        let cli = Cli::try_parse_from(["bizhub", "health"]).unwrap();
        assert!(matches!(cli.command, Commands::Health { ref url } if url == "http://localhost:3000"));
    }
}
