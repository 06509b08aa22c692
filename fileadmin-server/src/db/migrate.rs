use super::connection::DbPool;

/// Idempotent schema setup for the audit log.
pub fn migrate(pool: &DbPool) -> anyhow::Result<()> {
    let conn = pool.get()?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS audit_logs (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            file_name   TEXT NOT NULL,
            file_path   TEXT NOT NULL,
            action      TEXT NOT NULL,
            actor_id    INTEGER NOT NULL,
            actor_name  TEXT NOT NULL,
            ip_address  TEXT NOT NULL,
            user_agent  TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_audit_logs_action ON audit_logs(action);
        CREATE INDEX IF NOT EXISTS idx_audit_logs_created_at ON audit_logs(created_at);",
    )?;

    Ok(())
}
