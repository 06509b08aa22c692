use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Canonical backup part categories. Legacy filename variants (database,
/// plugin, theme, files) collapse into these during catalog grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartKind {
    Db,
    Plugins,
    Themes,
    Uploads,
    Others,
}

impl PartKind {
    /// Token used in artifact filenames (`<key>-<token>.zip`).
    pub fn token(&self) -> &'static str {
        match self {
            Self::Db => "db",
            Self::Plugins => "plugins",
            Self::Themes => "themes",
            Self::Uploads => "uploads",
            Self::Others => "others",
        }
    }

    /// Human label used in manifest lines and listings.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Db => "Database",
            Self::Plugins => "Plugins",
            Self::Themes => "Themes",
            Self::Uploads => "Uploads",
            Self::Others => "Others",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "db" | "database" => Some(Self::Db),
            "plugins" | "plugin" => Some(Self::Plugins),
            "themes" | "theme" => Some(Self::Themes),
            "uploads" | "files" => Some(Self::Uploads),
            "others" => Some(Self::Others),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFormat {
    RawSql,
    GzippedSql,
    Zip,
}

impl ArtifactFormat {
    pub fn from_filename(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".sql.gz") {
            Some(Self::GzippedSql)
        } else if lower.ends_with(".sql") {
            Some(Self::RawSql)
        } else if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

/// One file in the backup directory. Written once, immutable until deleted.
#[derive(Debug, Clone, Serialize)]
pub struct BackupArtifact {
    pub filename: String,
    pub size_bytes: u64,
    pub modified_at: String,
    pub part_kind: PartKind,
    pub format: ArtifactFormat,
}

/// Artifacts from one backup run, grouped under their shared key.
#[derive(Debug, Clone, Serialize)]
pub struct BackupSet {
    pub key: String,
    pub parts: BTreeMap<PartKind, BackupArtifact>,
    pub created_at: String,
    pub has_manifest: bool,
}

/// Which parts a backup run should produce. Fails fast upstream when both
/// `database` and `files` are off.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BackupSelection {
    #[serde(default)]
    pub database: bool,
    #[serde(default)]
    pub files: bool,
    #[serde(default)]
    pub plugins: bool,
    #[serde(default)]
    pub themes: bool,
    #[serde(default)]
    pub uploads: bool,
    #[serde(default)]
    pub others: bool,
}

impl BackupSelection {
    pub fn is_empty(&self) -> bool {
        !self.database && !self.files
    }
}

/// Outcome of a backup run. Oversized files the archiver skipped are
/// surfaced here so the caller sees best-effort inclusion, not silence.
#[derive(Debug, Clone, Serialize)]
pub struct BackupResult {
    pub key: String,
    pub artifacts: Vec<String>,
    pub skipped_files: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_kind_token_aliases() {
        assert_eq!(PartKind::from_token("database"), Some(PartKind::Db));
        assert_eq!(PartKind::from_token("PLUGIN"), Some(PartKind::Plugins));
        assert_eq!(PartKind::from_token("files"), Some(PartKind::Uploads));
        assert_eq!(PartKind::from_token("misc"), None);
    }

    #[test]
    fn test_format_from_filename() {
        assert_eq!(
            ArtifactFormat::from_filename("x-db.sql.gz"),
            Some(ArtifactFormat::GzippedSql)
        );
        assert_eq!(
            ArtifactFormat::from_filename("x-db.SQL"),
            Some(ArtifactFormat::RawSql)
        );
        assert_eq!(
            ArtifactFormat::from_filename("x-uploads.zip"),
            Some(ArtifactFormat::Zip)
        );
        assert_eq!(ArtifactFormat::from_filename("x.log"), None);
    }

    #[test]
    fn test_empty_selection() {
        let sel = BackupSelection {
            database: false,
            files: false,
            plugins: true,
            themes: true,
            uploads: true,
            others: true,
        };
        assert!(sel.is_empty());
    }
}
