use serde::Serialize;

/// Icon bucket derived from the file extension; purely presentational,
/// recomputed on every listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IconCategory {
    Folder,
    Image,
    Video,
    Audio,
    Archive,
    Document,
    Code,
    File,
}

impl IconCategory {
    pub fn for_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "webp" | "svg" | "ico" => Self::Image,
            "mp4" | "mkv" | "avi" | "mov" | "webm" => Self::Video,
            "mp3" | "wav" | "ogg" | "flac" | "m4a" => Self::Audio,
            "zip" | "gz" | "tar" | "rar" | "7z" | "bz2" => Self::Archive,
            "txt" | "md" | "pdf" | "doc" | "docx" | "xls" | "xlsx" | "csv" | "log" => {
                Self::Document
            }
            "rs" | "js" | "ts" | "py" | "php" | "html" | "htm" | "css" | "json" | "xml"
            | "sql" | "sh" | "toml" | "yml" | "yaml" => Self::Code,
            _ => Self::File,
        }
    }

    /// Coarse classification used by Stat responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Folder => "directory",
            Self::Image => "image",
            Self::Document => "document",
            Self::Code => "code",
            _ => "file",
        }
    }
}

/// One entry in a directory listing. The tree is never persisted; every
/// listing is a fresh directory scan.
#[derive(Debug, Clone, Serialize)]
pub struct FileNode {
    pub name: String,
    pub path: String,
    pub is_directory: bool,
    pub size_bytes: u64,
    pub modified_at: Option<String>,
    pub created_at: Option<String>,
    pub permissions_octal: String,
    pub icon_category: IconCategory,
}

/// Stat result: a FileNode plus access flags and the coarse type string.
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    #[serde(flatten)]
    pub node: FileNode,
    pub file_type: &'static str,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icon_category_from_extension() {
        assert_eq!(IconCategory::for_extension("PNG"), IconCategory::Image);
        assert_eq!(IconCategory::for_extension("rs"), IconCategory::Code);
        assert_eq!(IconCategory::for_extension("pdf"), IconCategory::Document);
        assert_eq!(IconCategory::for_extension("bin"), IconCategory::File);
    }

    #[test]
    fn test_kind_buckets() {
        assert_eq!(IconCategory::Folder.kind(), "directory");
        assert_eq!(IconCategory::Image.kind(), "image");
        assert_eq!(IconCategory::Archive.kind(), "file");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
    }
}
