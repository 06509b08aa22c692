use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tokio_util::io::ReaderStream;

use crate::auth::{ActorIdentity, Capability};
use crate::error::AppError;
use crate::models::audit_log::{self, NewAuditLog};
use crate::models::backup::BackupSelection;
use crate::routes::{backups, database, files, logs};
use crate::state::AppState;

/// Closed set of actions. A new action cannot reach a handler without also
/// declaring its capability here, so nothing bypasses the gate by typo.
#[derive(Debug, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum Action {
    ListFiles {
        #[serde(default)]
        path: Option<String>,
    },
    CreateFolder {
        path: String,
        name: String,
    },
    CreateFile {
        path: String,
        name: String,
        #[serde(default)]
        content: String,
    },
    DeleteItem {
        path: String,
    },
    RenameItem {
        path: String,
        new_name: String,
    },
    MoveItem {
        source: String,
        target_dir: String,
    },
    CopyItem {
        source: String,
        target_dir: String,
    },
    GetFileContent {
        path: String,
    },
    SaveFileContent {
        path: String,
        content: String,
    },
    GetFileInfo {
        path: String,
    },
    DownloadItem {
        path: String,
    },
    SearchFiles {
        #[serde(default)]
        path: Option<String>,
        query: String,
    },
    GetDirectoryTree {
        #[serde(default)]
        path: Option<String>,
    },
    BackupStart {
        #[serde(flatten)]
        selection: BackupSelection,
    },
    BackupList,
    BackupDelete {
        key: String,
    },
    BackupDownload {
        filename: String,
    },
    BackupDownloadAll {
        key: String,
    },
    BackupRestoreDb {
        filename: String,
    },
    BackupRestoreFiles {
        filename: String,
    },
    BackupViewLog {
        key: String,
    },
    RunQuery {
        query: String,
    },
    GetTables,
    BrowseTable {
        table: String,
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        offset: Option<usize>,
    },
    ExportDatabase,
    ExportTable {
        table: String,
    },
    ImportDatabase {
        sql: String,
    },
    ImportTable {
        sql: String,
    },
    EmptyTable {
        table: String,
    },
    DropTable {
        table: String,
    },
    LogsList {
        #[serde(default)]
        action: Option<String>,
        #[serde(default)]
        search: Option<String>,
        #[serde(default)]
        limit: Option<usize>,
    },
    LogsDeleteRows {
        ids: Vec<i64>,
    },
    LogsClearAll {
        #[serde(default)]
        action: Option<String>,
    },
}

impl Action {
    pub fn capability(&self) -> Capability {
        use Action::*;
        match self {
            ListFiles { .. } | CreateFolder { .. } | CreateFile { .. } | DeleteItem { .. }
            | RenameItem { .. } | MoveItem { .. } | CopyItem { .. } | GetFileContent { .. }
            | SaveFileContent { .. } | GetFileInfo { .. } | DownloadItem { .. }
            | SearchFiles { .. } | GetDirectoryTree { .. } => Capability::FileAccess,

            BackupList | BackupDownload { .. } | BackupDownloadAll { .. }
            | BackupViewLog { .. } => Capability::FileAccess,

            RunQuery { .. } | GetTables | BrowseTable { .. } | ExportDatabase
            | ExportTable { .. } => Capability::DbAccess,

            BackupStart { .. } | BackupDelete { .. } | BackupRestoreDb { .. }
            | BackupRestoreFiles { .. } | ImportDatabase { .. } | ImportTable { .. }
            | EmptyTable { .. } | DropTable { .. }
            | LogsList { .. } | LogsDeleteRows { .. } | LogsClearAll { .. } => {
                Capability::ManageOptions
            }
        }
    }
}

pub async fn handle(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(action): Json<Action>,
) -> Result<Response, AppError> {
    let actor = ActorIdentity::from_headers(&headers);
    if !state.checker.has_capability(&actor, action.capability()) {
        return Err(AppError::PermissionDenied(
            "You are not allowed to perform this action".to_string(),
        ));
    }

    use Action::*;
    match action {
        ListFiles { path } => files::list(state, path).await,
        CreateFolder { path, name } => files::create_folder(state, actor, path, name).await,
        CreateFile {
            path,
            name,
            content,
        } => files::create_file(state, actor, path, name, content).await,
        DeleteItem { path } => files::delete(state, actor, path).await,
        RenameItem { path, new_name } => files::rename(state, actor, path, new_name).await,
        MoveItem { source, target_dir } => files::mv(state, actor, source, target_dir).await,
        CopyItem { source, target_dir } => files::copy(state, actor, source, target_dir).await,
        GetFileContent { path } => files::read_content(state, path).await,
        SaveFileContent { path, content } => {
            files::save_content(state, actor, path, content).await
        }
        GetFileInfo { path } => files::info(state, path).await,
        DownloadItem { path } => files::download(state, actor, path).await,
        SearchFiles { path, query } => files::search(state, path, query).await,
        GetDirectoryTree { path } => files::tree(state, path).await,

        BackupStart { selection } => backups::start(state, actor, selection).await,
        BackupList => backups::list(state).await,
        BackupDelete { key } => backups::delete(state, actor, key).await,
        BackupDownload { filename } => backups::download(state, filename).await,
        BackupDownloadAll { key } => backups::download_all(state, key).await,
        BackupRestoreDb { filename } => backups::restore_db(state, actor, filename).await,
        BackupRestoreFiles { filename } => backups::restore_files(state, actor, filename).await,
        BackupViewLog { key } => backups::view_log(state, key).await,

        RunQuery { query } => database::run_query(state, actor, query).await,
        GetTables => database::get_tables(state).await,
        BrowseTable {
            table,
            limit,
            offset,
        } => database::browse_table(state, table, limit, offset).await,
        ExportDatabase => database::export_database(state).await,
        ExportTable { table } => database::export_table(state, table).await,
        ImportDatabase { sql } | ImportTable { sql } => database::import_sql(state, sql).await,
        EmptyTable { table } => database::empty_table(state, table).await,
        DropTable { table } => database::drop_table(state, table).await,

        LogsList {
            action,
            search,
            limit,
        } => logs::list(state, action, search, limit).await,
        LogsDeleteRows { ids } => logs::delete_rows(state, ids).await,
        LogsClearAll { action } => logs::clear_all(state, action).await,
    }
}

/// Runs a synchronous service call off the async runtime.
pub(crate) async fn blocking<T, F>(state: Arc<AppState>, f: F) -> Result<T, AppError>
where
    F: FnOnce(&AppState) -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?
}

pub(crate) fn ok_json<T: serde::Serialize>(data: T) -> Result<Response, AppError> {
    Ok((StatusCode::OK, Json(json!({ "success": true, "data": data }))).into_response())
}

/// Streams an already-open file as an attachment. Works for files whose
/// directory entry is gone; the descriptor keeps the bytes alive.
pub(crate) fn attachment_response(
    file: std::fs::File,
    size: u64,
    filename: &str,
) -> Result<Response, AppError> {
    let stream = ReaderStream::new(tokio::fs::File::from_std(file));
    Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, size)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(e.into()))
}

pub(crate) fn bytes_attachment(bytes: Vec<u8>, filename: &str) -> Result<Response, AppError> {
    let len = bytes.len();
    Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, len)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(Body::from(bytes))
        .map_err(|e| AppError::Internal(e.into()))
}

/// Best-effort audit trail plus notification. Failures are logged and
/// never affect the operation that triggered them.
pub(crate) fn audit(
    state: &Arc<AppState>,
    actor: &ActorIdentity,
    action: &str,
    file_name: &str,
    file_path: &str,
) {
    state.notifier.notify(action, file_name, file_path, actor);

    let db = state.db.clone();
    let action = action.to_string();
    let file_name = file_name.to_string();
    let file_path = file_path.to_string();
    let actor = actor.clone();
    let _ = tokio::task::spawn_blocking(move || {
        let result = db.get().map_err(anyhow::Error::from).and_then(|conn| {
            audit_log::insert(
                &conn,
                &NewAuditLog {
                    file_name: &file_name,
                    file_path: &file_path,
                    action: &action,
                    actor_id: actor.id,
                    actor_name: &actor.name,
                    ip_address: &actor.ip_address,
                    user_agent: &actor.user_agent,
                },
            )
        });
        if let Err(e) = result {
            tracing::warn!("audit insert failed: {e}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_deserializes_from_tag() {
        let action: Action = serde_json::from_value(json!({
            "action_type": "create_folder",
            "path": "/docs",
            "name": "new"
        }))
        .unwrap();
        assert!(matches!(action, Action::CreateFolder { .. }));
        assert_eq!(action.capability(), Capability::FileAccess);
    }

    #[test]
    fn test_unknown_action_rejected() {
        let result: Result<Action, _> = serde_json::from_value(json!({
            "action_type": "format_disk"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_backup_selection_flattens() {
        let action: Action = serde_json::from_value(json!({
            "action_type": "backup_start",
            "database": true,
            "files": true,
            "uploads": true
        }))
        .unwrap();
        match action {
            Action::BackupStart { selection } => {
                assert!(selection.database);
                assert!(selection.uploads);
                assert!(!selection.themes);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_import_actions_need_manage_options() {
        let action: Action = serde_json::from_value(json!({
            "action_type": "import_database",
            "sql": "CREATE TABLE t (id INTEGER);\n"
        }))
        .unwrap();
        assert!(matches!(action, Action::ImportDatabase { .. }));
        assert_eq!(action.capability(), Capability::ManageOptions);

        let action: Action = serde_json::from_value(json!({
            "action_type": "import_table",
            "sql": "INSERT INTO t VALUES (1);\n"
        }))
        .unwrap();
        assert_eq!(action.capability(), Capability::ManageOptions);
    }

    #[test]
    fn test_destructive_db_actions_need_manage_options() {
        let action: Action = serde_json::from_value(json!({
            "action_type": "drop_table",
            "table": "items"
        }))
        .unwrap();
        assert_eq!(action.capability(), Capability::ManageOptions);
    }
}
