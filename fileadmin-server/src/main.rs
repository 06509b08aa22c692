mod auth;
mod config;
mod db;
mod error;
mod fs;
mod models;
mod routes;
mod services;
mod state;

use std::path::Path;
use std::sync::Arc;

use tokio::signal;

use crate::config::AppConfig;
use crate::db::connection::create_pool;
use crate::db::migrate::migrate;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = AppConfig::from_env();
    tracing::info!("Starting fileadmin server on port {}", config.port);

    // Ensure managed directories exist and are not web-servable
    for dir in [
        &config.content_root,
        &config.uploads_dir,
        &config.backups_dir,
        &config.data_dir,
    ] {
        std::fs::create_dir_all(dir)?;
        protect_directory(dir)?;
    }

    // Initialize database
    let db_path = config.db_path.to_string_lossy().to_string();
    let pool = create_pool(&db_path);
    migrate(&pool)?;

    // Build application state
    let state = Arc::new(AppState::new(pool, config.clone()));

    // Build router
    let app = routes::create_router(state.clone());

    // Start HTTP server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    // Graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down...");
    db::connection::close_pool(&state.db);
    tracing::info!("Server stopped");

    Ok(())
}

/// Drops a deny-all access-control marker and an inert index placeholder
/// into a managed directory, in case a web server is ever pointed at it.
fn protect_directory(dir: &Path) -> std::io::Result<()> {
    let htaccess = dir.join(".htaccess");
    if !htaccess.exists() {
        std::fs::write(&htaccess, "deny from all\n")?;
    }
    let index = dir.join("index.html");
    if !index.exists() {
        std::fs::write(&index, "")?;
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
