use anyhow::Context;
use tracing_subscriber::EnvFilter;

use bizhub_api::config::config;
use bizhub_api::database::DatabaseManager;
use bizhub_api::{app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bizhub_api=info,tower_http=info")),
        )
        .init();

    let config = config();
    tracing::info!("Starting BizHub API in {:?} mode", config.environment);
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;

    let pool = DatabaseManager::connect(&config.database)
        .await
        .context("failed to connect to the database")?;
    DatabaseManager::migrate(&pool).await.context("failed to run migrations")?;

    let state = AppState::new(pool, config.clone());
    let sweeper = state.hub.spawn_typing_sweeper();
    let app = app(state);

    let bind_addr = format!("0.0.0.0:{}", config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("BizHub API listening on http://{}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    sweeper.abort();
    tracing::info!("BizHub API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
