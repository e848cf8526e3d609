// Main entry point for the fleet server

use std::future::IntoFuture;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use fleet_server::{kernel::ServerDeps, server::build_app, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fleet_server=debug,chassis=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!("Starting fleet server");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(service = %config.service_name, "Configuration loaded");
    let port = config.port;

    // Wire chassis components and background services
    let deps = ServerDeps::in_memory(config);
    let services = deps.background_services();
    let shutdown = services.shutdown_token();
    let app = build_app(deps, shutdown.clone());

    // Start server
    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await });

    // Ctrl-C cancels the shared token: the server drains and services stop
    let (served, hosted) = tokio::join!(server.into_future(), services.run_until_shutdown());
    served.context("Server error")?;
    hosted.context("Background service failed")?;

    tracing::info!("Shutdown complete");
    Ok(())
}
