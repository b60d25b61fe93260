mod batch;
mod collaborators;
mod config;
mod error;
mod gateway;
mod gemini;
mod history;
mod intake;
mod lookbook;
mod models;
mod orchestrator;
mod pdf;
mod pipeline;
mod prompts;
mod routes;
#[cfg(test)]
mod test_support;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::StudioConfig;
use crate::gemini::GeminiClient;
use crate::routes::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = StudioConfig::from_env().context("invalid configuration")?;
    if config.is_demo() {
        tracing::warn!("GEMINI_API_KEY not set - running in demo mode with placeholder images");
    } else {
        tracing::info!("Using API key: {}...", config.api_key.chars().take(6).collect::<String>());
    }
    tracing::info!(model = %config.image_model, initial_styles = config.initial_style_count, "Design Studio configured");

    let state = AppState::new(Arc::new(GeminiClient::new(&config)), config.initial_style_count);
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}
