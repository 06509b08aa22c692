use std::fs::File;
use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::http::HeaderMap;
use axum::response::Response;

use crate::auth::{ActorIdentity, Capability};
use crate::error::AppError;
use crate::fs::archive;
use crate::routes::dispatch::{attachment_response, audit, blocking, ok_json};
use crate::state::AppState;

fn basename(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("root")
        .to_string()
}

pub async fn list(state: Arc<AppState>, path: Option<String>) -> Result<Response, AppError> {
    let path = path.unwrap_or_else(|| "/".into());
    let nodes = blocking(state, move |s| s.store.list(&path)).await?;
    ok_json(nodes)
}

pub async fn create_folder(
    state: Arc<AppState>,
    actor: ActorIdentity,
    path: String,
    name: String,
) -> Result<Response, AppError> {
    let node = {
        let path = path.clone();
        let name = name.clone();
        blocking(state.clone(), move |s| s.store.create_folder(&path, &name)).await?
    };
    audit(&state, &actor, "create_folder", &name, &node.path);
    ok_json(node)
}

pub async fn create_file(
    state: Arc<AppState>,
    actor: ActorIdentity,
    path: String,
    name: String,
    content: String,
) -> Result<Response, AppError> {
    let node = {
        let path = path.clone();
        let name = name.clone();
        blocking(state.clone(), move |s| {
            s.store.create_file(&path, &name, &content)
        })
        .await?
    };
    audit(&state, &actor, "create_file", &name, &node.path);
    ok_json(node)
}

pub async fn delete(
    state: Arc<AppState>,
    actor: ActorIdentity,
    path: String,
) -> Result<Response, AppError> {
    {
        let path = path.clone();
        blocking(state.clone(), move |s| s.store.delete(&path)).await?;
    }
    audit(&state, &actor, "delete", &basename(&path), &path);
    ok_json("deleted")
}

pub async fn rename(
    state: Arc<AppState>,
    actor: ActorIdentity,
    path: String,
    new_name: String,
) -> Result<Response, AppError> {
    let node = {
        let path = path.clone();
        let new_name = new_name.clone();
        blocking(state.clone(), move |s| s.store.rename(&path, &new_name)).await?
    };
    audit(&state, &actor, "rename", &new_name, &node.path);
    ok_json(node)
}

pub async fn mv(
    state: Arc<AppState>,
    actor: ActorIdentity,
    source: String,
    target_dir: String,
) -> Result<Response, AppError> {
    let node = {
        let source = source.clone();
        blocking(state.clone(), move |s| s.store.mv(&source, &target_dir)).await?
    };
    audit(&state, &actor, "move", &basename(&source), &node.path);
    ok_json(node)
}

pub async fn copy(
    state: Arc<AppState>,
    actor: ActorIdentity,
    source: String,
    target_dir: String,
) -> Result<Response, AppError> {
    let node = {
        let source = source.clone();
        blocking(state.clone(), move |s| s.store.copy(&source, &target_dir)).await?
    };
    audit(&state, &actor, "copy", &basename(&source), &node.path);
    ok_json(node)
}

pub async fn read_content(state: Arc<AppState>, path: String) -> Result<Response, AppError> {
    let content = blocking(state, move |s| s.store.read_content(&path)).await?;
    ok_json(content)
}

pub async fn save_content(
    state: Arc<AppState>,
    actor: ActorIdentity,
    path: String,
    content: String,
) -> Result<Response, AppError> {
    let node = {
        let path = path.clone();
        blocking(state.clone(), move |s| s.store.write_content(&path, &content)).await?
    };
    audit(&state, &actor, "edit", &node.name, &node.path);
    ok_json(node)
}

pub async fn info(state: Arc<AppState>, path: String) -> Result<Response, AppError> {
    let info = blocking(state, move |s| s.store.stat(&path)).await?;
    ok_json(info)
}

/// Files stream as-is; directories are zipped on the fly into a staging
/// location that is gone by the time the stream starts (the descriptor
/// keeps the data).
pub async fn download(
    state: Arc<AppState>,
    actor: ActorIdentity,
    path: String,
) -> Result<Response, AppError> {
    let name = basename(&path);
    let (file, size, filename) = {
        let path = path.clone();
        let name = name.clone();
        blocking(state.clone(), move |s| {
            let (abs, is_dir) = s.store.resolve_for_download(&path)?;
            if is_dir {
                let staging = tempfile::TempDir::new().map_err(AppError::WriteFailed)?;
                let zip_path = staging.path().join(format!("{name}.zip"));
                let skipped = archive::archive_directory(
                    &abs,
                    &zip_path,
                    s.config.max_archive_file_bytes,
                )?;
                if !skipped.is_empty() {
                    tracing::warn!(count = skipped.len(), "oversized files left out of download");
                }
                let file = File::open(&zip_path).map_err(AppError::ReadFailed)?;
                let size = file.metadata().map_err(AppError::ReadFailed)?.len();
                Ok((file, size, format!("{name}.zip")))
            } else {
                let file = File::open(&abs).map_err(AppError::ReadFailed)?;
                let size = file.metadata().map_err(AppError::ReadFailed)?.len();
                Ok((file, size, name))
            }
        })
        .await?
    };
    audit(&state, &actor, "download", &filename, &path);
    attachment_response(file, size, &filename)
}

/// Multipart upload. One request may carry several files; each succeeds or
/// fails on its own and the response lists both sides, so one bad file does
/// not sink the batch. A `path` field picks the target directory, defaulting
/// to the uploads tree.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let actor = ActorIdentity::from_headers(&headers);
    if !state.checker.has_capability(&actor, Capability::FileAccess) {
        return Err(AppError::PermissionDenied(
            "You are not allowed to upload files".to_string(),
        ));
    }

    let mut target = String::from("/uploads");
    let mut incoming: Vec<(String, Vec<u8>)> = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() == Some("path") {
            target = field
                .text()
                .await
                .map_err(|e| AppError::BadRequest(e.to_string()))?;
            continue;
        }
        let Some(name) = field.file_name().map(|s| s.to_string()) else {
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        incoming.push((name, bytes.to_vec()));
    }
    if incoming.is_empty() {
        return Err(AppError::BadRequest("No files in request".to_string()));
    }

    let mut uploaded = Vec::new();
    let mut errors = Vec::new();
    for (name, bytes) in incoming {
        let result = {
            let target = target.clone();
            let name = name.clone();
            blocking(state.clone(), move |s| s.store.upload(&target, &name, &bytes)).await
        };
        match result {
            Ok(node) => {
                audit(&state, &actor, "upload", &node.name, &node.path);
                uploaded.push(node);
            }
            Err(e) => errors.push(serde_json::json!({
                "name": name,
                "error": e.to_string(),
            })),
        }
    }
    ok_json(serde_json::json!({ "uploaded": uploaded, "errors": errors }))
}

pub async fn search(
    state: Arc<AppState>,
    path: Option<String>,
    query: String,
) -> Result<Response, AppError> {
    let path = path.unwrap_or_else(|| "/".into());
    let hits = blocking(state, move |s| s.store.search(&path, &query)).await?;
    ok_json(hits)
}

pub async fn tree(state: Arc<AppState>, path: Option<String>) -> Result<Response, AppError> {
    let path = path.unwrap_or_else(|| "/".into());
    let tree = blocking(state, move |s| s.store.tree(&path)).await?;
    ok_json(tree)
}
