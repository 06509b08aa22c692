use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

/// One audit record per mutating file operation. Written best-effort: a
/// failed insert is logged and never fails the operation that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: i64,
    pub file_name: String,
    pub file_path: String,
    pub action: String,
    pub actor_id: i64,
    pub actor_name: String,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub created_at: String,
}

pub struct NewAuditLog<'a> {
    pub file_name: &'a str,
    pub file_path: &'a str,
    pub action: &'a str,
    pub actor_id: i64,
    pub actor_name: &'a str,
    pub ip_address: &'a str,
    pub user_agent: &'a str,
}

/// Default row cap for log queries; callers may override explicitly.
pub const DEFAULT_LIMIT: usize = 100;

fn row_to_log(row: &Row) -> rusqlite::Result<AuditLog> {
    Ok(AuditLog {
        id: row.get("id")?,
        file_name: row.get("file_name")?,
        file_path: row.get("file_path")?,
        action: row.get("action")?,
        actor_id: row.get("actor_id")?,
        actor_name: row.get("actor_name")?,
        ip_address: row.get("ip_address")?,
        user_agent: row.get("user_agent")?,
        created_at: row.get("created_at")?,
    })
}

pub fn insert(conn: &Connection, entry: &NewAuditLog) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO audit_logs (file_name, file_path, action, actor_id, actor_name, ip_address, user_agent, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entry.file_name,
            entry.file_path,
            entry.action,
            entry.actor_id,
            entry.actor_name,
            entry.ip_address,
            entry.user_agent,
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Newest-first, filtered by action kind and an optional free-text search
/// over file name and actor name.
pub fn find(
    conn: &Connection,
    action: Option<&str>,
    search: Option<&str>,
    limit: Option<usize>,
) -> anyhow::Result<Vec<AuditLog>> {
    let mut sql = String::from("SELECT * FROM audit_logs WHERE 1=1");
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(action) = action {
        sql.push_str(" AND action = ?");
        params.push(Box::new(action.to_string()));
    }
    if let Some(search) = search.filter(|s| !s.is_empty()) {
        sql.push_str(" AND (file_name LIKE ? ESCAPE '\\' OR actor_name LIKE ? ESCAPE '\\')");
        let like = format!("%{}%", search.replace('%', "\\%").replace('_', "\\_"));
        params.push(Box::new(like.clone()));
        params.push(Box::new(like));
    }
    sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ?");
    params.push(Box::new(limit.unwrap_or(DEFAULT_LIMIT) as i64));

    let mut stmt = conn.prepare(&sql)?;
    let refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(refs.as_slice(), row_to_log)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn delete_by_ids(conn: &Connection, ids: &[i64]) -> anyhow::Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    let placeholders = vec!["?"; ids.len()].join(",");
    let sql = format!("DELETE FROM audit_logs WHERE id IN ({})", placeholders);
    let refs: Vec<&dyn rusqlite::types::ToSql> =
        ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();
    Ok(conn.execute(&sql, refs.as_slice())?)
}

pub fn clear(conn: &Connection, action: Option<&str>) -> anyhow::Result<usize> {
    match action {
        Some(action) => Ok(conn.execute("DELETE FROM audit_logs WHERE action = ?", params![action])?),
        None => Ok(conn.execute("DELETE FROM audit_logs", [])?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::create_test_pool;
    use crate::db::migrate::migrate;

    fn entry<'a>(file_name: &'a str, action: &'a str, actor_name: &'a str) -> NewAuditLog<'a> {
        NewAuditLog {
            file_name,
            file_path: "/docs/file.txt",
            action,
            actor_id: 1,
            actor_name,
            ip_address: "127.0.0.1",
            user_agent: "tests",
        }
    }

    #[test]
    fn test_insert_and_filter_by_action() -> anyhow::Result<()> {
        let pool = create_test_pool();
        migrate(&pool)?;
        let conn = pool.get()?;

        insert(&conn, &entry("a.txt", "upload", "alice"))?;
        insert(&conn, &entry("b.txt", "delete", "bob"))?;

        let uploads = find(&conn, Some("upload"), None, None)?;
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].file_name, "a.txt");
        Ok(())
    }

    #[test]
    fn test_search_matches_file_and_actor_name() -> anyhow::Result<()> {
        let pool = create_test_pool();
        migrate(&pool)?;
        let conn = pool.get()?;

        insert(&conn, &entry("report.md", "edit", "alice"))?;
        insert(&conn, &entry("notes.txt", "edit", "bob"))?;

        let by_file = find(&conn, None, Some("report"), None)?;
        assert_eq!(by_file.len(), 1);
        let by_actor = find(&conn, None, Some("bob"), None)?;
        assert_eq!(by_actor.len(), 1);
        assert_eq!(by_actor[0].file_name, "notes.txt");
        Ok(())
    }

    #[test]
    fn test_limit_caps_results() -> anyhow::Result<()> {
        let pool = create_test_pool();
        migrate(&pool)?;
        let conn = pool.get()?;

        for i in 0..5 {
            insert(&conn, &entry(&format!("f{i}.txt"), "upload", "alice"))?;
        }
        assert_eq!(find(&conn, None, None, Some(3))?.len(), 3);
        Ok(())
    }

    #[test]
    fn test_delete_by_ids_and_clear() -> anyhow::Result<()> {
        let pool = create_test_pool();
        migrate(&pool)?;
        let conn = pool.get()?;

        let id = insert(&conn, &entry("a.txt", "upload", "alice"))?;
        insert(&conn, &entry("b.txt", "delete", "alice"))?;

        assert_eq!(delete_by_ids(&conn, &[id])?, 1);
        assert_eq!(clear(&conn, Some("delete"))?, 1);
        assert!(find(&conn, None, None, None)?.is_empty());
        Ok(())
    }
}
