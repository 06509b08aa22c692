pub mod audit_log;
pub mod backup;
pub mod file_node;
