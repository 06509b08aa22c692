use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::fs::archive::ArchiveBuilder;
use crate::models::backup::{ArtifactFormat, BackupArtifact, BackupSet, PartKind};

/// Reads, groups, bundles and deletes what BackupEngine leaves in the
/// backup directory. The `.log` manifest is the authoritative membership
/// index; filename-pattern matching only covers legacy artifacts that
/// predate manifests.
pub struct BackupCatalog {
    backups_dir: PathBuf,
    structured: Regex,
    structured_any: Regex,
    legacy: Regex,
    trailing_stamp: Regex,
}

impl BackupCatalog {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            backups_dir: config.backups_dir.clone(),
            structured: Regex::new(
                r"(?i)^(backup_\d{4}_\d{2}_\d{2}_\d{2}_\d{2}_\d{2}-[a-z0-9]+)-(db|database|plugins|plugin|themes|theme|uploads|files|others)\.(zip|sql|sql\.gz)$",
            )
            .unwrap(),
            structured_any: Regex::new(
                r"(?i)^(backup_\d{4}_\d{2}_\d{2}_\d{2}_\d{2}_\d{2}-[a-z0-9]+)-([a-z0-9]+)\.(zip|sql|sql\.gz)$",
            )
            .unwrap(),
            legacy: Regex::new(r"(?i)^(db|files)_(\d{8}_\d{6})\.(sql|zip)$").unwrap(),
            trailing_stamp: Regex::new(r"(?i)_(\d{8}_\d{6})\.(sql|zip|gz)$").unwrap(),
        }
    }

    /// Maps an artifact filename to its set key and part category. The
    /// stages mirror what existing installations already have on disk, so
    /// the order must not change.
    pub fn parse_key(&self, filename: &str) -> (String, PartKind) {
        if let Some(caps) = self.structured.captures(filename) {
            let part = PartKind::from_token(&caps[2]).unwrap_or(PartKind::Others);
            return (caps[1].to_string(), part);
        }
        if let Some(caps) = self.legacy.captures(filename) {
            let part = if caps[1].eq_ignore_ascii_case("db") {
                PartKind::Db
            } else {
                PartKind::Uploads
            };
            return (caps[2].to_string(), part);
        }
        if let Some(caps) = self.structured_any.captures(filename) {
            let part = PartKind::from_token(&caps[2]).unwrap_or(PartKind::Others);
            return (caps[1].to_string(), part);
        }
        if let Some(caps) = self.trailing_stamp.captures(filename) {
            let lower = filename.to_ascii_lowercase();
            let part = if lower.ends_with(".sql") || lower.ends_with(".sql.gz") {
                PartKind::Db
            } else {
                PartKind::Uploads
            };
            return (caps[1].to_string(), part);
        }
        let lower = filename.to_ascii_lowercase();
        let part = if lower.ends_with(".sql") || lower.ends_with(".sql.gz") {
            PartKind::Db
        } else {
            PartKind::Uploads
        };
        (lower, part)
    }

    /// Flat artifact scan, newest first. Grouping is layered on top.
    pub fn list(&self) -> Result<Vec<BackupArtifact>, AppError> {
        let mut out = Vec::new();
        let entries = match fs::read_dir(&self.backups_dir) {
            Ok(e) => e,
            Err(_) => return Ok(out),
        };
        for entry in entries {
            let entry = entry.map_err(AppError::ReadFailed)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(format) = ArtifactFormat::from_filename(&name) else {
                continue;
            };
            let meta = entry.metadata().map_err(AppError::ReadFailed)?;
            if !meta.is_file() {
                continue;
            }
            let (_, part_kind) = self.parse_key(&name);
            out.push(BackupArtifact {
                filename: name,
                size_bytes: meta.len(),
                modified_at: meta
                    .modified()
                    .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
                    .unwrap_or_default(),
                part_kind,
                format,
            });
        }
        out.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
        Ok(out)
    }

    /// Groups the flat artifact list into sets. Artifacts named in a
    /// manifest belong to that manifest's key regardless of what their
    /// filename pattern says.
    pub fn grouped(&self) -> Result<Vec<BackupSet>, AppError> {
        let artifacts = self.list()?;
        let manifest_index = self.manifest_membership()?;

        let mut sets: BTreeMap<String, BackupSet> = BTreeMap::new();
        for artifact in artifacts {
            let (fallback_key, part) = self.parse_key(&artifact.filename);
            let key = manifest_index
                .get(&artifact.filename)
                .cloned()
                .unwrap_or(fallback_key);
            let has_manifest = self.backups_dir.join(format!("{key}.log")).is_file();
            let set = sets.entry(key.clone()).or_insert_with(|| BackupSet {
                key,
                parts: BTreeMap::new(),
                created_at: String::new(),
                has_manifest,
            });
            if artifact.modified_at > set.created_at {
                set.created_at = artifact.modified_at.clone();
            }
            set.parts.entry(part).or_insert(artifact);
        }

        let mut out: Vec<BackupSet> = sets.into_values().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    /// filename -> key, read out of every manifest present.
    fn manifest_membership(&self) -> Result<BTreeMap<String, String>, AppError> {
        let mut index = BTreeMap::new();
        let entries = match fs::read_dir(&self.backups_dir) {
            Ok(e) => e,
            Err(_) => return Ok(index),
        };
        // Manifest lines end with "(<filename>) (<size>)".
        let line_re = Regex::new(r"\(([^()]+)\) \(([^()]+)\)\s*$")
            .map_err(|e| AppError::Internal(e.into()))?;
        for entry in entries {
            let entry = entry.map_err(AppError::ReadFailed)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(key) = name.strip_suffix(".log") else {
                continue;
            };
            let Ok(body) = fs::read_to_string(entry.path()) else {
                continue;
            };
            for line in body.lines() {
                if let Some(caps) = line_re.captures(line) {
                    index.insert(caps[1].to_string(), key.to_string());
                }
            }
        }
        Ok(index)
    }

    fn check_key(key: &str) -> Result<(), AppError> {
        if key.is_empty()
            || key.contains('/')
            || key.contains('\\')
            || key.contains('\0')
            || key.contains("..")
        {
            return Err(AppError::PathInvalid);
        }
        Ok(())
    }

    fn matches_key(name: &str, key: &str) -> bool {
        name.starts_with(&format!("{key}-"))
            || name == format!("{key}.log")
            || name.contains(key)
    }

    /// Deletes every artifact belonging to `key` plus its manifest. The
    /// substring match is deliberately broad for legacy artifacts. Each
    /// unlink re-checks containment in the backup root.
    pub fn delete_by_key(&self, key: &str) -> Result<Vec<String>, AppError> {
        Self::check_key(key)?;
        let root = self
            .backups_dir
            .canonicalize()
            .map_err(|_| AppError::NotFound(key.to_string()))?;

        let mut deleted = Vec::new();
        for entry in fs::read_dir(&root).map_err(AppError::ReadFailed)? {
            let entry = entry.map_err(AppError::ReadFailed)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !Self::matches_key(&name, key) {
                continue;
            }
            let real = entry
                .path()
                .canonicalize()
                .map_err(AppError::ReadFailed)?;
            if !real.starts_with(&root) || !real.is_file() {
                continue;
            }
            fs::remove_file(&real).map_err(AppError::WriteFailed)?;
            deleted.push(name);
        }
        if deleted.is_empty() {
            return Err(AppError::NotFound(format!("no artifacts for {key}")));
        }
        deleted.sort();
        Ok(deleted)
    }

    /// Nests a database zip and a files zip inside one `<key>-all.zip`.
    /// The returned handle stays readable after the temp paths vanish.
    pub fn bundle(&self, key: &str) -> Result<(File, u64, String), AppError> {
        Self::check_key(key)?;
        let artifacts: Vec<String> = {
            let entries = fs::read_dir(&self.backups_dir)
                .map_err(|_| AppError::NotFound(key.to_string()))?;
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|n| Self::matches_key(n, key))
                .collect()
        };
        if artifacts.is_empty() {
            return Err(AppError::NotFound(format!("no artifacts for {key}")));
        }

        let db_members: Vec<&String> = artifacts
            .iter()
            .filter(|n| {
                let l = n.to_ascii_lowercase();
                l.ends_with(".sql") || l.ends_with(".sql.gz") || l.ends_with(".log")
            })
            .collect();
        let file_members: Vec<&String> = artifacts
            .iter()
            .filter(|n| n.to_ascii_lowercase().ends_with(".zip"))
            .collect();

        let staging = tempfile::TempDir::new().map_err(AppError::WriteFailed)?;
        let mut inner = Vec::new();
        if !db_members.is_empty() {
            let path = staging.path().join(format!("{key}-database.zip"));
            self.zip_members(&path, &db_members)?;
            inner.push(path);
        }
        if !file_members.is_empty() {
            let path = staging.path().join(format!("{key}-files.zip"));
            self.zip_members(&path, &file_members)?;
            inner.push(path);
        }

        let bundle_name = format!("{key}-all.zip");
        let outer_path = staging.path().join(&bundle_name);
        {
            let outer = File::create(&outer_path).map_err(AppError::WriteFailed)?;
            let mut builder = ArchiveBuilder::new(outer, u64::MAX);
            for path in &inner {
                builder.add_file(path, "")?;
            }
            builder.finish()?;
        }

        let file = File::open(&outer_path).map_err(AppError::ReadFailed)?;
        let size = file.metadata().map_err(AppError::ReadFailed)?.len();
        // staging drops here; the open descriptor keeps the bundle readable.
        Ok((file, size, bundle_name))
    }

    fn zip_members(&self, target: &Path, members: &[&String]) -> Result<(), AppError> {
        let file = File::create(target).map_err(AppError::WriteFailed)?;
        // No per-file ceiling when bundling: the members already passed it.
        let mut builder = ArchiveBuilder::new(file, u64::MAX);
        for member in members {
            builder.add_file(&self.backups_dir.join(member.as_str()), "")?;
        }
        builder.finish()?;
        Ok(())
    }

    /// Opens one artifact for streaming, with the same confinement rules as
    /// every other client-named file.
    pub fn open_artifact(&self, name: &str) -> Result<(File, u64), AppError> {
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
        let file = File::open(&path).map_err(AppError::ReadFailed)?;
        let size = file.metadata().map_err(AppError::ReadFailed)?.len();
        Ok((file, size))
    }

    pub fn view_log(&self, key: &str) -> Result<String, AppError> {
        Self::check_key(key)?;
        let root = self
            .backups_dir
            .canonicalize()
            .map_err(|_| AppError::NotFound(key.to_string()))?;
        let path = root
            .join(format!("{key}.log"))
            .canonicalize()
            .map_err(|_| AppError::NotFound(format!("no manifest for {key}")))?;
        if !path.starts_with(&root) {
            return Err(AppError::PathInvalid);
        }
        fs::read_to_string(&path).map_err(AppError::ReadFailed)
    }
}
