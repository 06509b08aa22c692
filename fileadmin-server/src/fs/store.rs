use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use walkdir::WalkDir;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::fs::resolver;
use crate::models::file_node::{FileInfo, FileNode, IconCategory};

/// Extensions editable through the content editor. Everything else is
/// rejected with DisallowedType on create and save.
const EDITABLE_EXTENSIONS: [&str; 10] = [
    "txt", "css", "js", "html", "htm", "php", "json", "xml", "md", "log",
];

#[derive(Debug, Serialize)]
pub struct FileContent {
    pub content: String,
    pub size_bytes: u64,
    pub modified_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TreeNode {
    pub name: String,
    pub path: String,
    pub children: Vec<TreeNode>,
}

/// All path-confined filesystem operations. Every method resolves its own
/// paths; nothing here trusts a previously resolved path.
pub struct FileStore {
    root: PathBuf,
    reserved_names: Vec<String>,
    max_read_bytes: u64,
    max_upload_bytes: u64,
}

impl FileStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            root: config.content_root.clone(),
            reserved_names: config.reserved_names.clone(),
            max_read_bytes: config.max_read_bytes,
            max_upload_bytes: config.max_upload_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn virtual_path(&self, abs: &Path) -> String {
        let root = self.root.canonicalize().unwrap_or_else(|_| self.root.clone());
        match abs.strip_prefix(&root) {
            Ok(rel) if rel.as_os_str().is_empty() => "/".to_string(),
            Ok(rel) => format!("/{}", rel.to_string_lossy().replace('\\', "/")),
            Err(_) => "/".to_string(),
        }
    }

    fn node_from(&self, abs: &Path) -> Result<FileNode, AppError> {
        let meta = fs::metadata(abs).map_err(AppError::ReadFailed)?;
        let name = abs
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_string());
        let is_directory = meta.is_dir();
        let icon_category = if is_directory {
            IconCategory::Folder
        } else {
            IconCategory::for_extension(extension_of(&name))
        };
        Ok(FileNode {
            path: self.virtual_path(abs),
            is_directory,
            size_bytes: if is_directory { 0 } else { meta.len() },
            modified_at: system_time_rfc3339(meta.modified().ok()),
            created_at: system_time_rfc3339(meta.created().ok()),
            permissions_octal: format!("{:o}", meta.permissions().mode() & 0o777),
            icon_category,
            name,
        })
    }

    /// Immediate children only, dotfiles skipped. Reserved names (the
    /// backup directory among them) are hidden at the root level.
    pub fn list(&self, dir_path: &str) -> Result<Vec<FileNode>, AppError> {
        let abs = resolver::resolve(&self.root, dir_path)?;
        if !abs.is_dir() {
            return Err(AppError::NotFound(format!("directory {dir_path}")));
        }
        let at_root = abs == self.root.canonicalize().map_err(|_| AppError::PathInvalid)?;

        let mut nodes = Vec::new();
        for entry in fs::read_dir(&abs).map_err(AppError::ReadFailed)? {
            let entry = entry.map_err(AppError::ReadFailed)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if at_root && self.reserved_names.iter().any(|r| r == &name) {
                continue;
            }
            if let Ok(node) = self.node_from(&entry.path()) {
                nodes.push(node);
            }
        }
        nodes.sort_by(|a, b| {
            b.is_directory
                .cmp(&a.is_directory)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
        Ok(nodes)
    }

    pub fn create_folder(&self, parent_path: &str, name: &str) -> Result<FileNode, AppError> {
        let parent = resolver::resolve(&self.root, parent_path)?;
        let name = resolver::sanitize_name(name)?;
        let target = parent.join(&name);
        if target.exists() {
            return Err(AppError::AlreadyExists(name));
        }
        fs::create_dir_all(&target).map_err(AppError::WriteFailed)?;
        self.node_from(&target)
    }

    pub fn create_file(
        &self,
        parent_path: &str,
        name: &str,
        content: &str,
    ) -> Result<FileNode, AppError> {
        let parent = resolver::resolve(&self.root, parent_path)?;
        let name = resolver::sanitize_name(name)?;
        require_editable(&name)?;
        let target = parent.join(&name);
        if target.exists() {
            return Err(AppError::AlreadyExists(name));
        }
        fs::write(&target, content).map_err(AppError::WriteFailed)?;
        self.node_from(&target)
    }

    /// Stores an uploaded file verbatim. No extension allow-list here: any
    /// type may land in the tree, only the per-file size ceiling applies.
    pub fn upload(
        &self,
        parent_path: &str,
        name: &str,
        bytes: &[u8],
    ) -> Result<FileNode, AppError> {
        let parent = resolver::resolve(&self.root, parent_path)?;
        let name = resolver::sanitize_name(name)?;
        if bytes.len() as u64 > self.max_upload_bytes {
            return Err(AppError::TooLarge(format!(
                "{} is {} bytes, upload limit is {}",
                name,
                bytes.len(),
                self.max_upload_bytes
            )));
        }
        let target = parent.join(&name);
        if target.exists() {
            return Err(AppError::AlreadyExists(name));
        }
        fs::write(&target, bytes).map_err(AppError::WriteFailed)?;
        self.node_from(&target)
    }

    /// Checks the size ceiling before any read call is made.
    pub fn read_content(&self, path: &str) -> Result<FileContent, AppError> {
        let abs = resolver::resolve(&self.root, path)?;
        let meta = fs::metadata(&abs).map_err(|_| AppError::NotFound(path.to_string()))?;
        if !meta.is_file() {
            return Err(AppError::NotFound(path.to_string()));
        }
        if meta.len() > self.max_read_bytes {
            return Err(AppError::TooLarge(format!(
                "file is {} bytes, limit is {}",
                meta.len(),
                self.max_read_bytes
            )));
        }
        let content = fs::read_to_string(&abs).map_err(AppError::ReadFailed)?;
        Ok(FileContent {
            content,
            size_bytes: meta.len(),
            modified_at: system_time_rfc3339(meta.modified().ok()),
        })
    }

    pub fn write_content(&self, path: &str, content: &str) -> Result<FileNode, AppError> {
        let abs = resolver::resolve(&self.root, path)?;
        if !abs.is_file() {
            return Err(AppError::NotFound(path.to_string()));
        }
        let name = abs
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        require_editable(&name)?;
        let readonly = fs::metadata(&abs)
            .map_err(AppError::ReadFailed)?
            .permissions()
            .readonly();
        if readonly {
            return Err(AppError::PermissionDenied(format!("{path} is not writable")));
        }
        fs::write(&abs, content).map_err(AppError::WriteFailed)?;
        self.node_from(&abs)
    }

    /// Recursive for directories; an unremovable child aborts the whole
    /// delete and surfaces the failure.
    pub fn delete(&self, path: &str) -> Result<(), AppError> {
        let abs = resolver::resolve(&self.root, path)?;
        if abs == self.root.canonicalize().map_err(|_| AppError::PathInvalid)? {
            return Err(AppError::BadRequest("cannot delete the root".to_string()));
        }
        if abs.is_dir() {
            fs::remove_dir_all(&abs).map_err(AppError::WriteFailed)
        } else if abs.is_file() {
            fs::remove_file(&abs).map_err(AppError::WriteFailed)
        } else {
            Err(AppError::NotFound(path.to_string()))
        }
    }

    /// Sibling rename; the collision check is case-sensitive.
    pub fn rename(&self, path: &str, new_name: &str) -> Result<FileNode, AppError> {
        let abs = resolver::resolve(&self.root, path)?;
        if abs == self.root.canonicalize().map_err(|_| AppError::PathInvalid)? {
            return Err(AppError::BadRequest("cannot rename the root".to_string()));
        }
        let new_name = resolver::sanitize_name(new_name)?;
        let target = abs
            .parent()
            .ok_or(AppError::PathInvalid)?
            .join(&new_name);
        if target.exists() {
            return Err(AppError::TargetExists);
        }
        fs::rename(&abs, &target).map_err(AppError::WriteFailed)?;
        self.node_from(&target)
    }

    pub fn mv(&self, source_path: &str, target_dir: &str) -> Result<FileNode, AppError> {
        let source = resolver::resolve(&self.root, source_path)?;
        let dir = resolver::resolve(&self.root, target_dir)?;
        if !dir.is_dir() {
            return Err(AppError::NotFound(format!("directory {target_dir}")));
        }
        let name = source
            .file_name()
            .ok_or(AppError::PathInvalid)?
            .to_os_string();
        let target = dir.join(&name);
        if target.exists() {
            return Err(AppError::TargetExists);
        }
        fs::rename(&source, &target).map_err(AppError::WriteFailed)?;
        self.node_from(&target)
    }

    pub fn copy(&self, source_path: &str, target_dir: &str) -> Result<FileNode, AppError> {
        let source = resolver::resolve(&self.root, source_path)?;
        let dir = resolver::resolve(&self.root, target_dir)?;
        if !dir.is_dir() {
            return Err(AppError::NotFound(format!("directory {target_dir}")));
        }
        let name = source
            .file_name()
            .ok_or(AppError::PathInvalid)?
            .to_os_string();
        let target = dir.join(&name);
        if target.exists() {
            return Err(AppError::TargetExists);
        }
        if source.is_dir() {
            copy_tree(&source, &target)?;
        } else {
            fs::copy(&source, &target).map_err(AppError::WriteFailed)?;
        }
        self.node_from(&target)
    }

    pub fn stat(&self, path: &str) -> Result<FileInfo, AppError> {
        let abs = resolver::resolve(&self.root, path)?;
        let node = self
            .node_from(&abs)
            .map_err(|_| AppError::NotFound(path.to_string()))?;
        let mode = fs::metadata(&abs)
            .map_err(|_| AppError::NotFound(path.to_string()))?
            .permissions()
            .mode();
        let file_type = if node.is_directory {
            "directory"
        } else {
            node.icon_category.kind()
        };
        Ok(FileInfo {
            file_type,
            readable: mode & 0o400 != 0,
            writable: mode & 0o200 != 0,
            executable: mode & 0o100 != 0,
            node,
        })
    }

    /// Case-insensitive substring match over file names, and over content
    /// for files small enough to read. Dotfiles and reserved root names are
    /// excluded.
    pub fn search(&self, dir_path: &str, query: &str) -> Result<Vec<FileNode>, AppError> {
        let abs = resolver::resolve(&self.root, dir_path)?;
        if !abs.is_dir() {
            return Err(AppError::NotFound(format!("directory {dir_path}")));
        }
        let at_root = abs == self.root.canonicalize().map_err(|_| AppError::PathInvalid)?;
        let needle = query.to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let reserved = self.reserved_names.clone();
        let mut hits = Vec::new();
        let walker = WalkDir::new(&abs).follow_links(false).into_iter();
        for entry in walker.filter_entry(move |e| {
            if e.depth() == 0 {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            if name.starts_with('.') {
                return false;
            }
            !(at_root && e.depth() == 1 && reserved.iter().any(|r| r == &name))
        }) {
            let Ok(entry) = entry else { continue };
            if entry.depth() == 0 {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            let mut matched = name.to_lowercase().contains(&needle);
            if !matched && entry.file_type().is_file() {
                matched = self.content_matches(entry.path(), &needle);
            }
            if matched {
                if let Ok(node) = self.node_from(entry.path()) {
                    hits.push(node);
                }
            }
        }
        hits.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(hits)
    }

    fn content_matches(&self, path: &Path, needle: &str) -> bool {
        let Ok(meta) = fs::metadata(path) else {
            return false;
        };
        if meta.len() > self.max_read_bytes {
            return false;
        }
        fs::read_to_string(path)
            .map(|body| body.to_lowercase().contains(needle))
            .unwrap_or(false)
    }

    /// Directories-only tree for the sidebar navigation.
    pub fn tree(&self, dir_path: &str) -> Result<TreeNode, AppError> {
        let abs = resolver::resolve(&self.root, dir_path)?;
        if !abs.is_dir() {
            return Err(AppError::NotFound(format!("directory {dir_path}")));
        }
        let at_root = abs == self.root.canonicalize().map_err(|_| AppError::PathInvalid)?;
        self.tree_inner(&abs, at_root)
    }

    fn tree_inner(&self, abs: &Path, at_root: bool) -> Result<TreeNode, AppError> {
        let name = abs
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_string());
        let mut children = Vec::new();
        for entry in fs::read_dir(abs).map_err(AppError::ReadFailed)? {
            let entry = entry.map_err(AppError::ReadFailed)?;
            let child_name = entry.file_name().to_string_lossy().into_owned();
            if child_name.starts_with('.') {
                continue;
            }
            if at_root && self.reserved_names.iter().any(|r| r == &child_name) {
                continue;
            }
            if entry.path().is_dir() {
                children.push(self.tree_inner(&entry.path(), false)?);
            }
        }
        children.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(TreeNode {
            name,
            path: self.virtual_path(abs),
            children,
        })
    }

    /// Resolves a path for streaming; the caller archives directories.
    pub fn resolve_for_download(&self, path: &str) -> Result<(PathBuf, bool), AppError> {
        let abs = resolver::resolve(&self.root, path)?;
        if abs.is_file() {
            Ok((abs, false))
        } else if abs.is_dir() {
            Ok((abs, true))
        } else {
            Err(AppError::NotFound(path.to_string()))
        }
    }
}

fn extension_of(name: &str) -> &str {
    name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("")
}

fn require_editable(name: &str) -> Result<(), AppError> {
    let ext = extension_of(name).to_ascii_lowercase();
    if EDITABLE_EXTENSIONS.contains(&ext.as_str()) {
        Ok(())
    } else {
        Err(AppError::DisallowedType(ext))
    }
}

fn copy_tree(source: &Path, target: &Path) -> Result<(), AppError> {
    fs::create_dir_all(target).map_err(AppError::WriteFailed)?;
    for entry in fs::read_dir(source).map_err(AppError::ReadFailed)? {
        let entry = entry.map_err(AppError::ReadFailed)?;
        let dest = target.join(entry.file_name());
        if entry.path().is_dir() {
            copy_tree(&entry.path(), &dest)?;
        } else {
            fs::copy(entry.path(), &dest).map_err(AppError::WriteFailed)?;
        }
    }
    Ok(())
}

fn system_time_rfc3339(time: Option<std::time::SystemTime>) -> Option<String> {
    time.map(|t| DateTime::<Utc>::from(t).to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> FileStore {
        FileStore {
            root: dir.path().to_path_buf(),
            reserved_names: vec!["backups".to_string()],
            max_read_bytes: 1024,
            max_upload_bytes: 4096,
        }
    }

    #[test]
    fn test_list_sorts_dirs_first_and_hides_reserved() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::create_dir(dir.path().join("backups"))?;
        fs::create_dir(dir.path().join("Zeta"))?;
        fs::write(dir.path().join("alpha.txt"), b"x")?;
        fs::write(dir.path().join(".hidden"), b"x")?;

        let names: Vec<_> = store(&dir)
            .list("/")?
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(names, vec!["Zeta", "alpha.txt"]);
        Ok(())
    }

    #[test]
    fn test_reserved_visible_below_root() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::create_dir_all(dir.path().join("sub/backups"))?;
        let names: Vec<_> = store(&dir)
            .list("/sub")?
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(names, vec!["backups"]);
        Ok(())
    }

    #[test]
    fn test_create_file_enforces_allow_list() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let s = store(&dir);
        assert!(s.create_file("/", "ok.txt", "hi").is_ok());
        assert!(matches!(
            s.create_file("/", "evil.exe", ""),
            Err(AppError::DisallowedType(_))
        ));
        assert!(matches!(
            s.create_file("/", "ok.txt", "again"),
            Err(AppError::AlreadyExists(_))
        ));
        Ok(())
    }

    #[test]
    fn test_read_content_rejects_oversized_without_reading() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("big.txt"), vec![b'x'; 4096])?;
        assert!(matches!(
            store(&dir).read_content("/big.txt"),
            Err(AppError::TooLarge(_))
        ));
        Ok(())
    }

    #[test]
    fn test_rename_collision_leaves_both_files() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("a.txt"), b"a")?;
        fs::write(dir.path().join("b.txt"), b"b")?;
        let s = store(&dir);

        assert!(matches!(s.rename("/a.txt", "b.txt"), Err(AppError::TargetExists)));
        assert_eq!(fs::read(dir.path().join("a.txt"))?, b"a");
        assert_eq!(fs::read(dir.path().join("b.txt"))?, b"b");
        Ok(())
    }

    #[test]
    fn test_upload_ceiling_and_collision() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let s = store(&dir);

        let node = s.upload("/", "photo.png", b"binary")?;
        assert_eq!(node.name, "photo.png");
        assert_eq!(fs::read(dir.path().join("photo.png"))?, b"binary");

        assert!(matches!(
            s.upload("/", "photo.png", b"again"),
            Err(AppError::AlreadyExists(_))
        ));
        assert!(matches!(
            s.upload("/", "huge.bin", &vec![0u8; 5000]),
            Err(AppError::TooLarge(_))
        ));
        assert_eq!(s.upload("/", "my photo!.png", b"x")?.name, "my_photo_.png");
        Ok(())
    }

    #[test]
    fn test_delete_reports_failed_child() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let locked = dir.path().join("x/y");
        fs::create_dir_all(&locked)?;
        fs::write(locked.join("z.txt"), b"z")?;

        let mut perms = fs::metadata(&locked)?.permissions();
        perms.set_mode(0o555);
        fs::set_permissions(&locked, perms.clone())?;

        // Directory write bits do not bind root, so only assert the failure
        // when the unlink is actually refused.
        if fs::write(locked.join("w.txt"), b"w").is_err() {
            assert!(matches!(
                store(&dir).delete("/x"),
                Err(AppError::WriteFailed(_))
            ));
            assert!(locked.join("z.txt").exists());
        }

        perms.set_mode(0o755);
        fs::set_permissions(&locked, perms)?;
        Ok(())
    }

    #[test]
    fn test_delete_refuses_root() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        assert!(store(&dir).delete("/").is_err());
        assert!(dir.path().exists());
        Ok(())
    }

    #[test]
    fn test_copy_directory_recurses() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::create_dir_all(dir.path().join("src/nested"))?;
        fs::write(dir.path().join("src/nested/f.txt"), b"deep")?;
        fs::create_dir(dir.path().join("dest"))?;

        store(&dir).copy("/src", "/dest")?;
        assert_eq!(fs::read(dir.path().join("dest/src/nested/f.txt"))?, b"deep");
        assert!(dir.path().join("src/nested/f.txt").exists());
        Ok(())
    }

    #[test]
    fn test_move_is_a_rename() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("a.txt"), b"a")?;
        fs::create_dir(dir.path().join("dest"))?;

        store(&dir).mv("/a.txt", "/dest")?;
        assert!(!dir.path().join("a.txt").exists());
        assert_eq!(fs::read(dir.path().join("dest/a.txt"))?, b"a");
        Ok(())
    }

    #[test]
    fn test_search_case_insensitive() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::create_dir(dir.path().join("docs"))?;
        fs::write(dir.path().join("docs/Report.md"), b"x")?;
        fs::write(dir.path().join("notes.txt"), b"x")?;

        let hits = store(&dir).search("/", "report")?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Report.md");
        Ok(())
    }

    #[test]
    fn test_search_matches_content_and_skips_reserved() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("todo.txt"), b"remember the milk")?;
        fs::create_dir(dir.path().join("backups"))?;
        fs::write(dir.path().join("backups/milk.txt"), b"x")?;

        let hits = store(&dir).search("/", "milk")?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "todo.txt");
        Ok(())
    }

    #[test]
    fn test_stat_classifies_type() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("main.rs"), b"fn main() {}")?;
        let info = store(&dir).stat("/main.rs")?;
        assert_eq!(info.file_type, "code");
        assert!(info.readable);
        Ok(())
    }
}
