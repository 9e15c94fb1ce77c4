use std::time::Duration;

use anyhow::bail;
use serde_json::Value;

use crate::cli::utils::{output_error, output_success};
use crate::cli::OutputFormat;

pub async fn handle(url: &str, output_format: OutputFormat) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let endpoint = format!("{}/health", url.trim_end_matches('/'));

    let response = match client.get(&endpoint).timeout(Duration::from_secs(5)).send().await {
        Ok(response) => response,
        Err(e) => {
            output_error(output_format, &format!("{} unreachable: {}", endpoint, e), Some("UNREACHABLE"))?;
            bail!("health check failed");
        }
    };

    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    if status.is_success() {
        output_success(output_format, &format!("{} is healthy", url), Some(body))
    } else {
        output_error(
            output_format,
            &format!("{} reported {}", url, status),
            Some("UNHEALTHY"),
        )?;
        bail!("health check failed");
    }
}
