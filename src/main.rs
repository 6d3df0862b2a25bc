use anyhow::Context;
use tracing_subscriber::EnvFilter;

use fare_copilot::{config::ServiceConfig, model::ModelRegistry, server, session::SessionStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cfg = ServiceConfig::from_env().context("failed to read configuration")?;

    // Both models or nothing; never serve with one missing
    let models = ModelRegistry::load(&cfg.models).context("cannot start without both models")?;

    let sessions = SessionStore::with_capacity(cfg.session_capacity);
    let app = server::router(server::AppState::with_sessions(models, sessions));

    let addr = format!("{}:{}", cfg.host, cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
