pub mod backups;
pub mod database;
pub mod dispatch;
pub mod files;
pub mod logs;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Uploads carry whole files; leave headroom over the per-file ceiling
    // for multipart framing.
    let body_limit = state.config.max_upload_bytes as usize + 1024 * 1024;

    Router::new()
        .route("/api/action", post(dispatch::handle))
        .route("/api/upload", post(files::upload))
        .route("/api/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "success": true, "data": "ok" }))
}
