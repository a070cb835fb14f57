mod conditioning;
mod config;
mod engine;
mod error;
mod models;
mod orchestrator;
mod placeholder;
mod prompt;
mod remote;
mod routes;
mod storage;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;
use crate::engine::GenerativeEngine;
use crate::orchestrator::GenerationOrchestrator;
use crate::placeholder::PlaceholderEngine;
use crate::remote::RemoteEngine;
use crate::routes::{generate, health, memory, AppState};
use crate::storage::{OutputStore, PUBLIC_PREFIX};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = Config::from_env();
    tracing::info!(host = %config.host, port = config.port, "Loaded configuration");

    let engine: Arc<dyn GenerativeEngine> = match &config.engine_url {
        Some(url) => {
            tracing::info!("Using inference worker at {}", url);
            Arc::new(
                RemoteEngine::new(url, &config.controlnet_model_id, config.engine_timeout)
                    .context("failed to build engine client")?,
            )
        }
        None => {
            tracing::warn!("ENGINE_URL not set, running placeholder engine");
            Arc::new(PlaceholderEngine::new())
        }
    };

    let orchestrator = Arc::new(GenerationOrchestrator::new(
        engine,
        OutputStore::new(&config.output_dir),
        config.base_model_id.clone(),
    ));

    // Load in the background; /health reports readiness.
    let loader = Arc::clone(&orchestrator);
    tokio::spawn(async move {
        if !loader.initialize().await {
            tracing::error!("Engine failed to load; /generate will return 503 until restart");
        }
    });

    let state = AppState { orchestrator: Arc::clone(&orchestrator) };

    let app = Router::new()
        .route("/health", get(health))
        .route("/memory", get(memory))
        .route("/generate", post(generate))
        .nest_service(PUBLIC_PREFIX, ServeDir::new(&config.output_dir))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
                .layer(DefaultBodyLimit::max(config.body_limit_bytes)),
        )
        .with_state(state);

    let host = config.host.parse().with_context(|| format!("invalid HOST '{}'", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Server stopped, releasing engine");
    orchestrator.cleanup().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
