use std::path::PathBuf;

pub const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    /// All client-supplied paths are confined to this directory.
    pub content_root: PathBuf,
    pub uploads_dir: PathBuf,
    pub backups_dir: PathBuf,
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
    /// Top-level names hidden from root listings and searches.
    pub reserved_names: Vec<String>,
    /// Ceiling for `get_file_content` reads.
    pub max_read_bytes: u64,
    /// Ceiling for a single uploaded file.
    pub max_upload_bytes: u64,
    /// Per-file ceiling during archive construction; larger files are skipped.
    pub max_archive_file_bytes: u64,
    /// How long a stale backup lock is honored before being considered dead.
    pub backup_lock_ttl_secs: u64,
    /// Roles granted each capability. The platform in front of this service
    /// authenticates users and forwards their roles; we only map them.
    pub file_roles: Vec<String>,
    pub db_roles: Vec<String>,
    pub admin_roles: Vec<String>,
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    std::env::var(key)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_else(|_| default.iter().map(|s| s.to_string()).collect())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let content_root = PathBuf::from(
            std::env::var("CONTENT_ROOT").unwrap_or_else(|_| "./content".into()),
        );
        let data_dir =
            PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".into()));

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            uploads_dir: content_root.join("uploads"),
            backups_dir: content_root.join("backups"),
            db_path: data_dir.join("fileadmin.db"),
            data_dir,
            content_root,
            reserved_names: env_list("RESERVED_NAMES", &["backups"]),
            max_read_bytes: env_u64("MAX_READ_BYTES", 10 * MIB),
            max_upload_bytes: env_u64("MAX_UPLOAD_BYTES", 100 * MIB),
            max_archive_file_bytes: env_u64("MAX_ARCHIVE_FILE_BYTES", 200 * MIB),
            backup_lock_ttl_secs: env_u64("BACKUP_LOCK_TTL_SECS", 120),
            file_roles: env_list("FILE_ROLES", &["administrator"]),
            db_roles: env_list("DB_ROLES", &["administrator"]),
            admin_roles: env_list("ADMIN_ROLES", &["administrator"]),
        }
    }
}
