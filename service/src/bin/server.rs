//! Turnstile server
//!
//! Serves the minting and redemption API over `PostgreSQL`.
//!
//! # Usage
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/turnstile \
//! CATALOG_URL=http://catalog:8081 \
//! AUTH_URL=http://identity:8082 \
//! cargo run --bin turnstile-server
//! ```

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use turnstile_core::environment::SystemClock;
use turnstile_postgres::PostgresTicketStore;
use turnstile_service::auth::HttpSessionResolver;
use turnstile_service::{AppState, Config, HttpCatalog, build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "turnstile=info,tower_http=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        bind = %config.bind_address(),
        metrics_port = config.server.metrics_port,
        catalog = %config.catalog_url,
        "Configuration loaded"
    );

    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.server.metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .context("failed to install Prometheus exporter")?;
    turnstile_core::metrics::register_metrics();
    info!(%metrics_addr, "Prometheus exporter listening");

    let store = PostgresTicketStore::connect(&config.postgres.url, config.postgres.max_connections)
        .await
        .context("failed to connect to PostgreSQL")?;
    store.migrate().await.context("failed to run migrations")?;
    info!("Ticket store ready");

    let catalog = HttpCatalog::new(config.catalog_url.clone(), config.http_timeout())
        .context("failed to build catalog client")?;
    let sessions = HttpSessionResolver::new(config.auth_url.clone(), config.http_timeout())
        .context("failed to build identity client")?;

    let pool = store.pool().clone();
    let state = AppState::new(
        Arc::new(store),
        Arc::new(catalog),
        Arc::new(sessions),
        Arc::new(SystemClock),
        config.minter_config(),
    );
    let app = build_router(state);

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!(addr = %config.bind_address(), "Turnstile server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("HTTP server stopped, closing database pool");
    if tokio::time::timeout(config.shutdown_timeout(), pool.close())
        .await
        .is_err()
    {
        tracing::warn!("Database pool did not close within the shutdown timeout");
    }
    info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal, shutting down gracefully..."),
        () = terminate => info!("Received SIGTERM signal, shutting down gracefully..."),
    }
}
