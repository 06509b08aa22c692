use std::sync::Arc;

use axum::response::Response;

use crate::auth::ActorIdentity;
use crate::error::AppError;
use crate::models::backup::BackupSelection;
use crate::routes::dispatch::{attachment_response, audit, blocking, ok_json};
use crate::state::AppState;

pub async fn start(
    state: Arc<AppState>,
    actor: ActorIdentity,
    selection: BackupSelection,
) -> Result<Response, AppError> {
    let result = blocking(state.clone(), move |s| s.engine.create(selection)).await?;
    audit(&state, &actor, "backup", &result.key, "backups");
    ok_json(result)
}

/// Grouped view: one entry per backup run, manifest-indexed.
pub async fn list(state: Arc<AppState>) -> Result<Response, AppError> {
    let sets = blocking(state, |s| s.catalog.grouped()).await?;
    ok_json(sets)
}

pub async fn delete(
    state: Arc<AppState>,
    actor: ActorIdentity,
    key: String,
) -> Result<Response, AppError> {
    let deleted = {
        let key = key.clone();
        blocking(state.clone(), move |s| s.catalog.delete_by_key(&key)).await?
    };
    audit(&state, &actor, "backup_delete", &key, "backups");
    ok_json(deleted)
}

pub async fn download(state: Arc<AppState>, filename: String) -> Result<Response, AppError> {
    let name = filename.clone();
    let (file, size) =
        blocking(state, move |s| s.catalog.open_artifact(&filename)).await?;
    attachment_response(file, size, &name)
}

pub async fn download_all(state: Arc<AppState>, key: String) -> Result<Response, AppError> {
    let (file, size, bundle_name) =
        blocking(state, move |s| s.catalog.bundle(&key)).await?;
    attachment_response(file, size, &bundle_name)
}

pub async fn restore_db(
    state: Arc<AppState>,
    actor: ActorIdentity,
    filename: String,
) -> Result<Response, AppError> {
    let executed = {
        let filename = filename.clone();
        blocking(state.clone(), move |s| s.engine.restore_database(&filename)).await?
    };
    audit(&state, &actor, "restore_db", &filename, "backups");
    ok_json(serde_json::json!({ "executed_statements": executed }))
}

pub async fn restore_files(
    state: Arc<AppState>,
    actor: ActorIdentity,
    filename: String,
) -> Result<Response, AppError> {
    {
        let filename = filename.clone();
        blocking(state.clone(), move |s| s.engine.restore_files(&filename)).await?;
    }
    audit(&state, &actor, "restore_files", &filename, "backups");
    ok_json("restored")
}

pub async fn view_log(state: Arc<AppState>, key: String) -> Result<Response, AppError> {
    let body = blocking(state, move |s| s.catalog.view_log(&key)).await?;
    ok_json(body)
}
