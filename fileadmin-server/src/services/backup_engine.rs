use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Local;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::fs::archive::{extract_archive, ArchiveBuilder};
use crate::models::backup::{BackupResult, BackupSelection, PartKind};
use crate::models::file_node::format_size;
use crate::services::query_gateway::QueryGateway;

/// One backup at a time, system-wide. The TTL keeps a crashed run from
/// wedging the lock forever.
pub struct BackupLock {
    held_since: Mutex<Option<Instant>>,
    ttl: Duration,
}

impl BackupLock {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            held_since: Mutex::new(None),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    pub fn try_acquire(&self) -> Result<BackupLockGuard<'_>, AppError> {
        let mut slot = self.held_since.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(at) = *slot {
            if at.elapsed() < self.ttl {
                return Err(AppError::LockBusy);
            }
        }
        *slot = Some(Instant::now());
        Ok(BackupLockGuard { lock: self })
    }

    fn release(&self) {
        *self.held_since.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// Releases on drop, so the lock clears on every exit path.
pub struct BackupLockGuard<'a> {
    lock: &'a BackupLock,
}

impl Drop for BackupLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

pub struct BackupEngine {
    content_root: PathBuf,
    uploads_dir: PathBuf,
    backups_dir: PathBuf,
    max_archive_file_bytes: u64,
    lock: Arc<BackupLock>,
    gateway: Arc<QueryGateway>,
}

impl BackupEngine {
    pub fn new(config: &AppConfig, gateway: Arc<QueryGateway>) -> Self {
        Self {
            content_root: config.content_root.clone(),
            uploads_dir: config.uploads_dir.clone(),
            backups_dir: config.backups_dir.clone(),
            max_archive_file_bytes: config.max_archive_file_bytes,
            lock: Arc::new(BackupLock::new(config.backup_lock_ttl_secs)),
            gateway,
        }
    }

    pub fn create(&self, selection: BackupSelection) -> Result<BackupResult, AppError> {
        if selection.is_empty() {
            return Err(AppError::BadRequest(
                "Nothing selected for backup".to_string(),
            ));
        }
        let _guard = self.lock.try_acquire()?;

        fs::create_dir_all(&self.backups_dir).map_err(AppError::WriteFailed)?;
        let key = format!(
            "backup_{}-{}",
            Local::now().format("%Y_%m_%d_%H_%M_%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );

        let mut artifacts: Vec<String> = Vec::new();
        let mut skipped: Vec<String> = Vec::new();
        let mut manifest: Vec<(PartKind, String, u64)> = Vec::new();

        if selection.database {
            let filename = self.dump_database(&key).map_err(|e| partial(&artifacts, "database", e))?;
            let size = artifact_size(&self.backups_dir.join(&filename));
            manifest.push((PartKind::Db, filename.clone(), size));
            artifacts.push(filename);
        }

        if selection.files {
            for (kind, sources) in self.file_categories(&selection) {
                let existing: Vec<PathBuf> =
                    sources.into_iter().filter(|p| p.is_dir()).collect();
                if existing.is_empty() {
                    continue;
                }
                let filename = format!("{key}-{}.zip", kind.token());
                match self.archive_category(&filename, &existing) {
                    Ok(mut part_skipped) => {
                        skipped.append(&mut part_skipped);
                        let size = artifact_size(&self.backups_dir.join(&filename));
                        manifest.push((kind, filename.clone(), size));
                        artifacts.push(filename);
                    }
                    Err(e) => {
                        let _ = fs::remove_file(self.backups_dir.join(&filename));
                        return Err(partial(&artifacts, kind.token(), e));
                    }
                }
            }
        }

        self.write_manifest(&key, &manifest)
            .map_err(|e| partial(&artifacts, "manifest", e))?;

        tracing::info!(key, artifacts = artifacts.len(), "backup complete");
        Ok(BackupResult {
            key,
            artifacts,
            skipped_files: skipped,
        })
    }

    /// Gzipped dump preferred, raw `.sql` fallback when compression fails.
    /// Exactly one of the two is left on disk.
    fn dump_database(&self, key: &str) -> Result<String, AppError> {
        let dump = self.gateway.dump_sql()?;

        let gz_name = format!("{key}-db.sql.gz");
        let gz_path = self.backups_dir.join(&gz_name);
        match write_gzip(&gz_path, dump.as_bytes()) {
            Ok(()) => Ok(gz_name),
            Err(e) => {
                tracing::warn!("gzip dump failed, falling back to raw sql: {e}");
                let _ = fs::remove_file(&gz_path);
                let raw_name = format!("{key}-db.sql");
                fs::write(self.backups_dir.join(&raw_name), &dump)
                    .map_err(AppError::WriteFailed)?;
                Ok(raw_name)
            }
        }
    }

    fn file_categories(&self, selection: &BackupSelection) -> Vec<(PartKind, Vec<PathBuf>)> {
        let mut out = Vec::new();
        if selection.uploads {
            out.push((PartKind::Uploads, vec![self.uploads_dir.clone()]));
        }
        if selection.plugins {
            out.push((PartKind::Plugins, vec![self.content_root.join("plugins")]));
        }
        if selection.themes {
            out.push((PartKind::Themes, vec![self.content_root.join("themes")]));
        }
        if selection.others {
            out.push((PartKind::Others, self.other_top_level_dirs()));
        }
        out
    }

    /// Top-level content directories not already covered by a named category
    /// and not the backup directory itself.
    fn other_top_level_dirs(&self) -> Vec<PathBuf> {
        let covered: Vec<Option<&std::ffi::OsStr>> = vec![
            self.uploads_dir.file_name(),
            self.backups_dir.file_name(),
            Some(std::ffi::OsStr::new("plugins")),
            Some(std::ffi::OsStr::new("themes")),
        ];
        let Ok(entries) = fs::read_dir(&self.content_root) else {
            return Vec::new();
        };
        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .filter(|p| !p.file_name().is_some_and(|n| n.to_string_lossy().starts_with('.')))
            .filter(|p| !covered.contains(&p.file_name()))
            .collect();
        dirs.sort();
        dirs
    }

    fn archive_category(
        &self,
        filename: &str,
        sources: &[PathBuf],
    ) -> Result<Vec<String>, AppError> {
        let file =
            File::create(self.backups_dir.join(filename)).map_err(AppError::WriteFailed)?;
        let mut builder = ArchiveBuilder::new(file, self.max_archive_file_bytes);
        for source in sources {
            let prefix = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            builder.add_tree(source, &prefix)?;
        }
        Ok(builder.finish()?)
    }

    fn write_manifest(
        &self,
        key: &str,
        entries: &[(PartKind, String, u64)],
    ) -> Result<(), AppError> {
        let when = Local::now().format("%d %b, %Y %I:%M %p");
        let mut body = String::new();
        for (ordinal, (kind, filename, size)) in entries.iter().enumerate() {
            body.push_str(&format!(
                "({}) {} backup done on date {} ({}) ({})\n",
                ordinal + 1,
                kind.label(),
                when,
                filename,
                format_size(*size)
            ));
        }
        fs::write(self.backups_dir.join(format!("{key}.log")), body)
            .map_err(AppError::WriteFailed)
    }

    /// Confinement check for a client-supplied artifact name.
    fn resolve_artifact(&self, name: &str) -> Result<PathBuf, AppError> {
        if name.contains('/') || name.contains('\\') || name.contains('\0') {
            return Err(AppError::PathInvalid);
        }
        let root = self
            .backups_dir
            .canonicalize()
            .map_err(|_| AppError::NotFound(name.to_string()))?;
        let path = root
            .join(name)
            .canonicalize()
            .map_err(|_| AppError::NotFound(name.to_string()))?;
        if !path.starts_with(&root) || !path.is_file() {
            return Err(AppError::PathInvalid);
        }
        Ok(path)
    }

    /// Re-runs a dump statement by statement. Not idempotent-safe to retry
    /// blindly; the caller owns deduplication.
    pub fn restore_database(&self, artifact_name: &str) -> Result<usize, AppError> {
        let lower = artifact_name.to_ascii_lowercase();
        if !lower.ends_with(".sql") && !lower.ends_with(".sql.gz") {
            return Err(AppError::BadRequest(format!(
                "{artifact_name} is not a database artifact"
            )));
        }
        let path = self.resolve_artifact(artifact_name)?;
        let raw = fs::read(&path).map_err(AppError::ReadFailed)?;
        let script = if lower.ends_with(".gz") {
            let mut decoder = GzDecoder::new(raw.as_slice());
            let mut out = String::new();
            decoder
                .read_to_string(&mut out)
                .map_err(AppError::ReadFailed)?;
            out
        } else {
            String::from_utf8_lossy(&raw).into_owned()
        };
        self.gateway.execute_script(&script)
    }

    /// Extracts into an isolated staging directory, then merges into the
    /// live root. Staging is removed on every exit path.
    pub fn restore_files(&self, artifact_name: &str) -> Result<(), AppError> {
        if !artifact_name.to_ascii_lowercase().ends_with(".zip") {
            return Err(AppError::BadRequest(format!(
                "{artifact_name} is not a file archive"
            )));
        }
        let path = self.resolve_artifact(artifact_name)?;
        let staging = tempfile::TempDir::new().map_err(AppError::WriteFailed)?;
        extract_archive(&path, staging.path())?;
        merge_tree(staging.path(), &self.content_root)
    }
}

fn partial(completed: &[String], failed_part: &str, err: AppError) -> AppError {
    AppError::PartialBackup {
        completed: completed.to_vec(),
        failed_part: failed_part.to_string(),
        message: err.to_string(),
    }
}

fn artifact_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn write_gzip(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let file = File::create(path)?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()?;
    Ok(())
}

/// Copies the extracted tree over the live one, creating parents as needed.
fn merge_tree(source: &Path, target: &Path) -> Result<(), AppError> {
    fs::create_dir_all(target).map_err(AppError::WriteFailed)?;
    for entry in fs::read_dir(source).map_err(AppError::ReadFailed)? {
        let entry = entry.map_err(AppError::ReadFailed)?;
        let dest = target.join(entry.file_name());
        if entry.path().is_dir() {
            merge_tree(&entry.path(), &dest)?;
        } else {
            fs::copy(entry.path(), &dest).map_err(AppError::WriteFailed)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::create_test_pool;
    use regex::Regex;
    use tempfile::TempDir;

    fn seeded_gateway() -> Arc<QueryGateway> {
        let pool = create_test_pool();
        {
            let conn = pool.get().unwrap();
            conn.execute_batch(
                "CREATE TABLE settings (k TEXT PRIMARY KEY, v TEXT);
                 INSERT INTO settings VALUES ('site', 'demo');",
            )
            .unwrap();
        }
        Arc::new(QueryGateway::new(pool))
    }

    fn engine(root: &TempDir, gateway: Arc<QueryGateway>) -> BackupEngine {
        BackupEngine {
            content_root: root.path().to_path_buf(),
            uploads_dir: root.path().join("uploads"),
            backups_dir: root.path().join("backups"),
            max_archive_file_bytes: 1024 * 1024,
            lock: Arc::new(BackupLock::new(120)),
            gateway,
        }
    }

    fn full_selection() -> BackupSelection {
        BackupSelection {
            database: true,
            files: true,
            plugins: true,
            themes: true,
            uploads: true,
            others: true,
        }
    }

    #[test]
    fn test_create_produces_keyed_artifacts_and_manifest() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        fs::create_dir(root.path().join("uploads"))?;
        fs::write(root.path().join("uploads/pic.txt"), b"x")?;
        fs::create_dir(root.path().join("extra"))?;
        fs::write(root.path().join("extra/note.md"), b"y")?;

        let engine = engine(&root, seeded_gateway());
        let result = engine.create(full_selection())?;

        let key_re = Regex::new(r"^backup_\d{4}_\d{2}_\d{2}_\d{2}_\d{2}_\d{2}-[a-f0-9]{8}$")?;
        assert!(key_re.is_match(&result.key), "bad key: {}", result.key);

        let backups = root.path().join("backups");
        assert!(backups.join(format!("{}-db.sql.gz", result.key)).is_file());
        assert!(backups.join(format!("{}-uploads.zip", result.key)).is_file());
        assert!(backups.join(format!("{}-others.zip", result.key)).is_file());
        assert!(!backups.join(format!("{}-db.sql", result.key)).exists());

        let manifest = fs::read_to_string(backups.join(format!("{}.log", result.key)))?;
        assert!(manifest.contains("(1) Database backup done on date"));
        assert!(manifest.contains(&format!("{}-uploads.zip", result.key)));
        Ok(())
    }

    #[test]
    fn test_empty_selection_rejected_before_locking() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let engine = engine(&root, seeded_gateway());
        let selection = BackupSelection {
            database: false,
            files: false,
            plugins: false,
            themes: false,
            uploads: false,
            others: false,
        };
        assert!(matches!(
            engine.create(selection),
            Err(AppError::BadRequest(_))
        ));
        assert!(engine.lock.try_acquire().is_ok());
        Ok(())
    }

    #[test]
    fn test_lock_serializes_and_releases_on_drop() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let engine = engine(&root, seeded_gateway());

        let guard = engine.lock.try_acquire()?;
        assert!(matches!(
            engine.create(full_selection()),
            Err(AppError::LockBusy)
        ));
        drop(guard);
        assert!(engine.create(full_selection()).is_ok());
        Ok(())
    }

    #[test]
    fn test_stale_lock_expires() -> anyhow::Result<()> {
        let lock = Arc::new(BackupLock::new(0));
        let _guard = lock.try_acquire()?;
        std::thread::sleep(Duration::from_millis(5));
        assert!(lock.try_acquire().is_ok());
        Ok(())
    }

    #[test]
    fn test_database_restore_round_trip() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        let gateway = seeded_gateway();
        let engine = engine(&root, Arc::clone(&gateway));
        let result = engine.create(BackupSelection {
            database: true,
            files: false,
            plugins: false,
            themes: false,
            uploads: false,
            others: false,
        })?;

        gateway.execute("DELETE FROM settings").unwrap();
        let executed = engine.restore_database(&result.artifacts[0])?;
        assert!(executed >= 3);
        let out = gateway.execute("SELECT v FROM settings").unwrap();
        assert_eq!(out.rows[0][0], serde_json::json!("demo"));
        Ok(())
    }

    #[test]
    fn test_files_restore_merges_into_root() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        fs::create_dir(root.path().join("uploads"))?;
        fs::write(root.path().join("uploads/keep.txt"), b"v1")?;

        let engine = engine(&root, seeded_gateway());
        let result = engine.create(BackupSelection {
            database: false,
            files: true,
            plugins: false,
            themes: false,
            uploads: true,
            others: false,
        })?;

        fs::write(root.path().join("uploads/keep.txt"), b"changed")?;
        let archive = format!("{}-uploads.zip", result.key);
        engine.restore_files(&archive)?;
        assert_eq!(fs::read(root.path().join("uploads/keep.txt"))?, b"v1");
        Ok(())
    }

    #[test]
    fn test_restore_rejects_escaping_artifact_names() -> anyhow::Result<()> {
        let root = TempDir::new()?;
        fs::create_dir(root.path().join("backups"))?;
        let engine = engine(&root, seeded_gateway());
        assert!(engine.restore_database("../secret.sql").is_err());
        assert!(engine.restore_files("nope.txt").is_err());
        Ok(())
    }
}
