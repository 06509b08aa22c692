use std::sync::Arc;

use axum::response::Response;

use crate::error::AppError;
use crate::models::audit_log;
use crate::routes::dispatch::{blocking, ok_json};
use crate::state::AppState;

pub async fn list(
    state: Arc<AppState>,
    action: Option<String>,
    search: Option<String>,
    limit: Option<usize>,
) -> Result<Response, AppError> {
    let rows = blocking(state, move |s| {
        let conn = s.db.get().map_err(|e| AppError::Internal(e.into()))?;
        audit_log::find(&conn, action.as_deref(), search.as_deref(), limit)
            .map_err(AppError::Internal)
    })
    .await?;
    ok_json(rows)
}

pub async fn delete_rows(state: Arc<AppState>, ids: Vec<i64>) -> Result<Response, AppError> {
    let removed = blocking(state, move |s| {
        let conn = s.db.get().map_err(|e| AppError::Internal(e.into()))?;
        audit_log::delete_by_ids(&conn, &ids).map_err(AppError::Internal)
    })
    .await?;
    ok_json(serde_json::json!({ "rows_removed": removed }))
}

pub async fn clear_all(
    state: Arc<AppState>,
    action: Option<String>,
) -> Result<Response, AppError> {
    let removed = blocking(state, move |s| {
        let conn = s.db.get().map_err(|e| AppError::Internal(e.into()))?;
        audit_log::clear(&conn, action.as_deref()).map_err(AppError::Internal)
    })
    .await?;
    ok_json(serde_json::json!({ "rows_removed": removed }))
}
