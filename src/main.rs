//! DataGov API - Data Governance Console backend
//!
//! Serves the metadata registries (data elements, quality rules, mapping
//! rules), external data source synchronization, quality checks and the
//! governance task workflow behind role based JWT authentication.

mod auth;
mod config;
mod db;
mod error;
mod models;
mod repository;
mod routes;
mod seed;
mod state;
mod workflow;

use crate::auth::hash_password;
use crate::config::{LogFormat, Settings, StorageBackend, DEV_JWT_SECRET};
use crate::db::PgStore;
use crate::repository::MemoryStore;
use crate::routes::create_router;
use crate::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;
    init_tracing(settings.log_format);

    info!("Starting DataGov API v{}", env!("CARGO_PKG_VERSION"));

    if settings.auth.jwt_secret == DEV_JWT_SECRET {
        warn!("JWT_SECRET not set, using the development secret (set it in production!)");
    }

    let state = match settings.storage {
        StorageBackend::Postgres => {
            let pool = db::create_pool(&settings.database)?;
            if let Err(e) = db::bootstrap(&pool, &settings.auth.admin_password).await {
                error!("Failed to prepare database: {}", e);
                return Err(e.into());
            }
            info!(
                "Using PostgreSQL at {}:{}/{}",
                settings.database.host, settings.database.port, settings.database.database
            );
            AppState::new(Arc::new(PgStore::new(pool)), settings.clone())
        }
        StorageBackend::Memory => {
            warn!("Using the in-memory store, data is lost on shutdown");
            let admin_hash = hash_password(&settings.auth.admin_password)?;
            AppState::new(Arc::new(MemoryStore::seeded(&admin_hash)), settings.clone())
        }
    };

    let app = create_router(Arc::new(state));

    let addr = SocketAddr::from((settings.server.host, settings.server.port));
    info!("Server listening on http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,datagov_api=debug,tower_http=debug"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json().with_current_span(false)).init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .compact(),
            )
            .init(),
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
