use std::sync::Arc;

use crate::auth::CapabilityChecker;
use crate::config::AppConfig;
use crate::db::connection::DbPool;
use crate::fs::store::FileStore;
use crate::services::backup_catalog::BackupCatalog;
use crate::services::backup_engine::BackupEngine;
use crate::services::notifier::{LogSink, NotificationSink};
use crate::services::query_gateway::QueryGateway;

/// Explicit dependency bag built once at startup and handed to the
/// dispatcher; no service is reachable through a global.
pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub checker: CapabilityChecker,
    pub store: FileStore,
    pub gateway: Arc<QueryGateway>,
    pub engine: BackupEngine,
    pub catalog: BackupCatalog,
    pub notifier: Arc<dyn NotificationSink>,
}

impl AppState {
    pub fn new(db: DbPool, config: AppConfig) -> Self {
        let gateway = Arc::new(QueryGateway::new(db.clone()));
        Self {
            checker: CapabilityChecker::new(&config),
            store: FileStore::new(&config),
            engine: BackupEngine::new(&config, Arc::clone(&gateway)),
            catalog: BackupCatalog::new(&config),
            notifier: Arc::new(LogSink),
            gateway,
            db,
            config,
        }
    }
}
