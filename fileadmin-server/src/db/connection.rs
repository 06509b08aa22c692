use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Pool over the single SQLite file that serves both as the audit store and
/// as the relational store the database browser and backup dump operate on.
pub fn create_pool(db_path: &str) -> DbPool {
    let manager = SqliteConnectionManager::file(db_path);
    let pool = Pool::builder()
        .max_size(4)
        .build(manager)
        .expect("Failed to create DB pool");

    let conn = pool.get().expect("Failed to get DB connection");
    conn.execute_batch(
        "PRAGMA journal_mode = DELETE;
         PRAGMA synchronous = FULL;
         PRAGMA busy_timeout = 5000;
         PRAGMA foreign_keys = ON;",
    )
    .expect("Failed to set PRAGMA");

    pool
}

pub fn close_pool(pool: &DbPool) {
    // r2d2 closes connections when the pool is dropped; checkpoint is a
    // no-op in DELETE mode but harmless if the journal mode was changed
    // by a restored dump.
    if let Ok(conn) = pool.get() {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }
}

#[cfg(test)]
pub fn create_test_pool() -> DbPool {
    let manager = SqliteConnectionManager::memory();
    Pool::builder()
        .max_size(1)
        .build(manager)
        .expect("Failed to create test pool")
}
