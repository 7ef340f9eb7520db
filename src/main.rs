use anyhow::Context;
use tracing_subscriber::EnvFilter;

use solidunion_gate::backend::build_store;
use solidunion_gate::config::config;
use solidunion_gate::is_development;
use solidunion_gate::server::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up GATE_*, DATABASE_URL, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,solidunion_gate=debug")),
        )
        .init();

    let config = config();
    tracing::info!("Starting SolidUnion Gate in {:?} mode", config.environment);

    if config.security.jwt_secret.is_empty() {
        anyhow::bail!("GATE_JWT_SECRET must be set outside development");
    }
    if !is_development!() && config.security.jwt_secret.starts_with("dev-only") {
        tracing::warn!("Using the development JWT secret in {:?}", config.environment);
    }

    let store = build_store(config).await.context("failed to build profile store")?;
    let state = AppState::new(store, config);
    let ctx = state.ctx.clone();
    let app = build_router(state, config);

    let bind_addr = format!("0.0.0.0:{}", config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("SolidUnion Gate listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    ctx.teardown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
