use regex::Regex;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{json, Value};

use crate::db::connection::DbPool;
use crate::error::AppError;

/// Statements containing any of these (substring match over the uppercased
/// text) require the manage-options capability.
const RESTRICTED_KEYWORDS: [&str; 7] = [
    "DROP", "DELETE", "TRUNCATE", "ALTER", "CREATE", "INSERT", "UPDATE",
];

/// Statements starting with one of these produce a result set; everything
/// else reports an affected-row count.
const RESULT_SET_PREFIXES: [&str; 4] = ["SELECT", "SHOW", "DESCRIBE", "EXPLAIN"];

#[derive(Debug, Serialize)]
pub struct QueryOutcome {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub affected_rows: usize,
    pub is_result_set: bool,
}

#[derive(Debug, Serialize)]
pub struct TableSummary {
    pub name: String,
    pub row_count: i64,
}

/// Thin SQL boundary over the pooled SQLite handle. Does no SQL parsing
/// beyond the keyword gates above.
pub struct QueryGateway {
    pool: DbPool,
}

impl QueryGateway {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn is_restricted(sql: &str) -> bool {
        let upper = sql.to_uppercase();
        RESTRICTED_KEYWORDS.iter().any(|kw| upper.contains(kw))
    }

    fn yields_result_set(sql: &str) -> bool {
        let upper = sql.trim_start().to_uppercase();
        RESULT_SET_PREFIXES.iter().any(|p| upper.starts_with(p))
    }

    pub fn execute(&self, sql: &str) -> Result<QueryOutcome, AppError> {
        let conn = self.pool.get().map_err(|e| AppError::Internal(e.into()))?;
        if Self::yields_result_set(sql) {
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| AppError::QueryError(e.to_string()))?;
            let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
            let count = columns.len();
            let mut rows_out = Vec::new();
            let mut rows = stmt
                .query([])
                .map_err(|e| AppError::QueryError(e.to_string()))?;
            while let Some(row) = rows.next().map_err(|e| AppError::QueryError(e.to_string()))? {
                let mut out = Vec::with_capacity(count);
                for i in 0..count {
                    out.push(value_ref_to_json(
                        row.get_ref(i).map_err(|e| AppError::QueryError(e.to_string()))?,
                    ));
                }
                rows_out.push(out);
            }
            Ok(QueryOutcome {
                columns,
                affected_rows: rows_out.len(),
                rows: rows_out,
                is_result_set: true,
            })
        } else {
            let affected = conn
                .execute(sql, [])
                .map_err(|e| AppError::QueryError(e.to_string()))?;
            Ok(QueryOutcome {
                columns: Vec::new(),
                rows: Vec::new(),
                affected_rows: affected,
                is_result_set: false,
            })
        }
    }

    pub fn list_tables(&self) -> Result<Vec<TableSummary>, AppError> {
        let conn = self.pool.get().map_err(|e| AppError::Internal(e.into()))?;
        let names = table_names(&conn)?;
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let row_count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM \"{name}\""), [], |r| r.get(0))
                .map_err(|e| AppError::QueryError(e.to_string()))?;
            out.push(TableSummary { name, row_count });
        }
        Ok(out)
    }

    /// Pages through a known table. The table name is checked against the
    /// schema, never interpolated from raw client input.
    pub fn browse_table(
        &self,
        table: &str,
        limit: usize,
        offset: usize,
    ) -> Result<QueryOutcome, AppError> {
        let conn = self.pool.get().map_err(|e| AppError::Internal(e.into()))?;
        require_known_table(&conn, table)?;
        drop(conn);
        self.execute(&format!(
            "SELECT * FROM \"{table}\" LIMIT {limit} OFFSET {offset}"
        ))
    }

    pub fn create_statement(&self, table: &str) -> Result<String, AppError> {
        let conn = self.pool.get().map_err(|e| AppError::Internal(e.into()))?;
        create_statement(&conn, table)
    }

    /// Renders the whole database as DDL plus INSERT statements.
    pub fn dump_sql(&self) -> Result<String, AppError> {
        let conn = self.pool.get().map_err(|e| AppError::Internal(e.into()))?;
        let mut dump = String::new();
        for table in table_names(&conn)? {
            dump_table_into(&conn, &table, &mut dump)?;
        }
        Ok(dump)
    }

    pub fn dump_table(&self, table: &str) -> Result<String, AppError> {
        let conn = self.pool.get().map_err(|e| AppError::Internal(e.into()))?;
        let mut dump = String::new();
        dump_table_into(&conn, table, &mut dump)?;
        Ok(dump)
    }

    pub fn empty_table(&self, table: &str) -> Result<usize, AppError> {
        let conn = self.pool.get().map_err(|e| AppError::Internal(e.into()))?;
        require_known_table(&conn, table)?;
        conn.execute(&format!("DELETE FROM \"{table}\""), [])
            .map_err(|e| AppError::QueryError(e.to_string()))
    }

    pub fn drop_table(&self, table: &str) -> Result<(), AppError> {
        let conn = self.pool.get().map_err(|e| AppError::Internal(e.into()))?;
        require_known_table(&conn, table)?;
        conn.execute(&format!("DROP TABLE \"{table}\""), [])
            .map_err(|e| AppError::QueryError(e.to_string()))?;
        Ok(())
    }

    /// Runs a restore script statement by statement, fail-fast. The split on
    /// a semicolon-newline boundary mis-splits literals that embed that
    /// sequence; acceptable for dumps this engine itself produced.
    pub fn execute_script(&self, script: &str) -> Result<usize, AppError> {
        let conn = self.pool.get().map_err(|e| AppError::Internal(e.into()))?;
        let splitter = Regex::new(r";\s*\n").map_err(|e| AppError::Internal(e.into()))?;
        let mut executed = 0usize;
        for raw in splitter.split(script) {
            let stmt = raw.trim();
            if stmt.is_empty() || stmt.starts_with("--") {
                continue;
            }
            if let Err(e) = conn.execute_batch(&format!("{stmt};")) {
                return Err(AppError::PartialRestore {
                    executed,
                    message: e.to_string(),
                });
            }
            executed += 1;
        }
        Ok(executed)
    }
}

fn table_names(conn: &Connection) -> Result<Vec<String>, AppError> {
    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )
        .map_err(|e| AppError::QueryError(e.to_string()))?;
    let rows = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .map_err(|e| AppError::QueryError(e.to_string()))?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

fn require_known_table(conn: &Connection, table: &str) -> Result<(), AppError> {
    if table_names(conn)?.iter().any(|t| t == table) {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("table {table}")))
    }
}

fn create_statement(conn: &Connection, table: &str) -> Result<String, AppError> {
    conn.query_row(
        "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |r| r.get::<_, String>(0),
    )
    .map_err(|_| AppError::NotFound(format!("table {table}")))
}

fn dump_table_into(conn: &Connection, table: &str, out: &mut String) -> Result<(), AppError> {
    let ddl = create_statement(conn, table)?;
    out.push_str(&format!("DROP TABLE IF EXISTS \"{table}\";\n"));
    out.push_str(&ddl);
    out.push_str(";\n");

    let mut stmt = conn
        .prepare(&format!("SELECT * FROM \"{table}\""))
        .map_err(|e| AppError::QueryError(e.to_string()))?;
    let count = stmt.column_count();
    let mut rows = stmt
        .query([])
        .map_err(|e| AppError::QueryError(e.to_string()))?;
    while let Some(row) = rows.next().map_err(|e| AppError::QueryError(e.to_string()))? {
        let mut values = Vec::with_capacity(count);
        for i in 0..count {
            values.push(sql_literal(
                row.get_ref(i).map_err(|e| AppError::QueryError(e.to_string()))?,
            ));
        }
        out.push_str(&format!(
            "INSERT INTO \"{table}\" VALUES ({});\n",
            values.join(", ")
        ));
    }
    out.push('\n');
    Ok(())
}

fn sql_literal(value: ValueRef) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => {
            let text = String::from_utf8_lossy(t);
            format!("'{}'", text.replace('\'', "''"))
        }
        ValueRef::Blob(b) => {
            let hex: String = b.iter().map(|byte| format!("{byte:02x}")).collect();
            format!("X'{hex}'")
        }
    }
}

fn value_ref_to_json(value: ValueRef) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => json!(String::from_utf8_lossy(t)),
        ValueRef::Blob(b) => json!(format!("<blob {} bytes>", b.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::create_test_pool;

    fn seeded_gateway() -> QueryGateway {
        let pool = create_test_pool();
        {
            let conn = pool.get().unwrap();
            conn.execute_batch(
                "CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT, score REAL);
                 INSERT INTO items VALUES (1, 'it''s a test', 1.5);
                 INSERT INTO items VALUES (2, NULL, NULL);",
            )
            .unwrap();
        }
        QueryGateway::new(pool)
    }

    #[test]
    fn test_restricted_keyword_detection() {
        assert!(QueryGateway::is_restricted("drop table items"));
        assert!(QueryGateway::is_restricted("SELECT * FROM t WHERE x = 'UPDATE'"));
        assert!(!QueryGateway::is_restricted("SELECT id FROM items"));
    }

    #[test]
    fn test_select_returns_rows() {
        let gw = seeded_gateway();
        let out = gw.execute("SELECT id, label FROM items ORDER BY id").unwrap();
        assert!(out.is_result_set);
        assert_eq!(out.columns, vec!["id", "label"]);
        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.rows[1][1], Value::Null);
    }

    #[test]
    fn test_mutation_reports_affected_count() {
        let gw = seeded_gateway();
        let out = gw.execute("UPDATE items SET score = 0").unwrap();
        assert!(!out.is_result_set);
        assert_eq!(out.affected_rows, 2);
    }

    #[test]
    fn test_list_tables_with_counts() {
        let gw = seeded_gateway();
        let tables = gw.list_tables().unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "items");
        assert_eq!(tables[0].row_count, 2);
    }

    #[test]
    fn test_dump_and_restore_round_trip() {
        let gw = seeded_gateway();
        let dump = gw.dump_sql().unwrap();
        assert!(dump.contains("CREATE TABLE items"));
        assert!(dump.contains("'it''s a test'"));

        let fresh = QueryGateway::new(create_test_pool());
        let executed = fresh.execute_script(&dump).unwrap();
        assert!(executed >= 3);
        let out = fresh.execute("SELECT COUNT(*) FROM items").unwrap();
        assert_eq!(out.rows[0][0], json!(2));
    }

    #[test]
    fn test_execute_script_fail_fast_with_count() {
        let gw = seeded_gateway();
        let script = "UPDATE items SET score = 9;\nSELECT * FROM missing_table;\nUPDATE items SET score = 0;\n";
        match gw.execute_script(script) {
            Err(AppError::PartialRestore { executed, .. }) => assert_eq!(executed, 1),
            other => panic!("expected PartialRestore, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_and_drop_table() {
        let gw = seeded_gateway();
        assert_eq!(gw.empty_table("items").unwrap(), 2);
        gw.drop_table("items").unwrap();
        assert!(gw.list_tables().unwrap().is_empty());
        assert!(matches!(gw.drop_table("items"), Err(AppError::NotFound(_))));
    }
}
