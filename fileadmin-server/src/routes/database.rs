use std::sync::Arc;

use axum::response::Response;
use chrono::Local;

use crate::auth::{ActorIdentity, Capability};
use crate::error::AppError;
use crate::routes::dispatch::{blocking, bytes_attachment, ok_json};
use crate::services::query_gateway::QueryGateway;
use crate::state::AppState;

/// Free-form SQL. Statements touching the restricted keyword list need the
/// manage-options capability on top of db-access.
pub async fn run_query(
    state: Arc<AppState>,
    actor: ActorIdentity,
    query: String,
) -> Result<Response, AppError> {
    if QueryGateway::is_restricted(&query)
        && !state.checker.has_capability(&actor, Capability::ManageOptions)
    {
        return Err(AppError::PermissionDenied(
            "This query requires elevated permissions".to_string(),
        ));
    }
    let outcome = blocking(state, move |s| s.gateway.execute(&query)).await?;
    ok_json(outcome)
}

pub async fn get_tables(state: Arc<AppState>) -> Result<Response, AppError> {
    let tables = blocking(state, |s| s.gateway.list_tables()).await?;
    ok_json(tables)
}

pub async fn browse_table(
    state: Arc<AppState>,
    table: String,
    limit: Option<usize>,
    offset: Option<usize>,
) -> Result<Response, AppError> {
    let outcome = blocking(state, move |s| {
        s.gateway
            .browse_table(&table, limit.unwrap_or(50), offset.unwrap_or(0))
    })
    .await?;
    ok_json(outcome)
}

pub async fn export_database(state: Arc<AppState>) -> Result<Response, AppError> {
    let dump = blocking(state, |s| s.gateway.dump_sql()).await?;
    let filename = format!("database_export_{}.sql", Local::now().format("%Y%m%d_%H%M%S"));
    bytes_attachment(dump.into_bytes(), &filename)
}

pub async fn export_table(state: Arc<AppState>, table: String) -> Result<Response, AppError> {
    let name = table.clone();
    let dump = blocking(state, move |s| s.gateway.dump_table(&table)).await?;
    let filename = format!("{name}_{}.sql", Local::now().format("%Y%m%d_%H%M%S"));
    bytes_attachment(dump.into_bytes(), &filename)
}

/// Runs an uploaded SQL script statement by statement. Stops at the first
/// failure and reports how far it got.
pub async fn import_sql(state: Arc<AppState>, sql: String) -> Result<Response, AppError> {
    let executed = blocking(state, move |s| s.gateway.execute_script(&sql)).await?;
    ok_json(serde_json::json!({ "executed_statements": executed }))
}

pub async fn empty_table(state: Arc<AppState>, table: String) -> Result<Response, AppError> {
    let removed = blocking(state, move |s| s.gateway.empty_table(&table)).await?;
    ok_json(serde_json::json!({ "rows_removed": removed }))
}

pub async fn drop_table(state: Arc<AppState>, table: String) -> Result<Response, AppError> {
    blocking(state, move |s| s.gateway.drop_table(&table)).await?;
    ok_json("dropped")
}
