pub mod backup_catalog;
pub mod backup_engine;
pub mod notifier;
pub mod query_gateway;
