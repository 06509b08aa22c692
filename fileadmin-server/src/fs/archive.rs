use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Builds zip archives under a per-file size ceiling. Files over the ceiling
/// and unreadable entries are skipped, not fatal; skipped names are collected
/// so callers can surface them instead of losing data silently.
pub struct ArchiveBuilder<W: Write + io::Seek> {
    writer: ZipWriter<W>,
    max_file_bytes: u64,
    skipped: Vec<String>,
}

impl<W: Write + io::Seek> ArchiveBuilder<W> {
    pub fn new(inner: W, max_file_bytes: u64) -> Self {
        Self {
            writer: ZipWriter::new(inner),
            max_file_bytes,
            skipped: Vec::new(),
        }
    }

    fn options() -> FileOptions<'static, ()> {
        FileOptions::<'static, ()>::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(true)
    }

    /// Adds one regular file as `prefix/<basename>`. Oversized or unreadable
    /// files are recorded in the skip list.
    pub fn add_file(&mut self, source: &Path, prefix: &str) -> anyhow::Result<()> {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let entry_name = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", prefix.trim_end_matches('/'), name)
        };
        self.add_entry(source, &entry_name)
    }

    /// Walks `source_dir` recursively, adding each regular file under
    /// `prefix/<relative-path>`. Symlinks are not followed.
    pub fn add_tree(&mut self, source_dir: &Path, prefix: &str) -> anyhow::Result<()> {
        for entry in WalkDir::new(source_dir).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    self.skipped
                        .push(err.path().map(|p| p.display().to_string()).unwrap_or_default());
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(source_dir)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            let entry_name = if prefix.is_empty() {
                rel
            } else {
                format!("{}/{}", prefix.trim_end_matches('/'), rel)
            };
            self.add_entry(entry.path(), &entry_name)?;
        }
        Ok(())
    }

    fn add_entry(&mut self, source: &Path, entry_name: &str) -> anyhow::Result<()> {
        let meta = match source.metadata() {
            Ok(m) => m,
            Err(_) => {
                self.skipped.push(source.display().to_string());
                return Ok(());
            }
        };
        if meta.len() > self.max_file_bytes {
            self.skipped.push(source.display().to_string());
            return Ok(());
        }
        let mut file = match File::open(source) {
            Ok(f) => f,
            Err(_) => {
                self.skipped.push(source.display().to_string());
                return Ok(());
            }
        };
        self.writer.start_file(entry_name, Self::options())?;
        io::copy(&mut file, &mut self.writer)?;
        Ok(())
    }

    pub fn finish(mut self) -> anyhow::Result<Vec<String>> {
        self.writer.finish()?;
        Ok(self.skipped)
    }
}

/// Archives a whole directory into `target`, returning the skip list.
pub fn archive_directory(
    source_dir: &Path,
    target: &Path,
    max_file_bytes: u64,
) -> anyhow::Result<Vec<String>> {
    let file = File::create(target)?;
    let mut builder = ArchiveBuilder::new(file, max_file_bytes);
    builder.add_tree(source_dir, "")?;
    builder.finish()
}

/// Extracts a zip into `target_dir`, rejecting entries that would land
/// outside it.
pub fn extract_archive(archive_path: &Path, target_dir: &Path) -> anyhow::Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(rel) = entry.enclosed_name().map(PathBuf::from) else {
            continue;
        };
        let out_path = target_dir.join(rel);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_archive_and_extract_round_trip() -> anyhow::Result<()> {
        let src = TempDir::new()?;
        fs::create_dir(src.path().join("sub"))?;
        fs::write(src.path().join("a.txt"), b"hello")?;
        fs::write(src.path().join("sub/b.txt"), b"world")?;

        let out = TempDir::new()?;
        let zip_path = out.path().join("tree.zip");
        let skipped = archive_directory(src.path(), &zip_path, 1024 * 1024)?;
        assert!(skipped.is_empty());

        let dest = TempDir::new()?;
        extract_archive(&zip_path, dest.path())?;
        assert_eq!(fs::read(dest.path().join("a.txt"))?, b"hello");
        assert_eq!(fs::read(dest.path().join("sub/b.txt"))?, b"world");
        Ok(())
    }

    #[test]
    fn test_size_ceiling_skips_large_files() -> anyhow::Result<()> {
        let src = TempDir::new()?;
        fs::write(src.path().join("small.txt"), vec![b'x'; 512])?;
        fs::write(src.path().join("big.bin"), vec![b'x'; 8192])?;

        let out = TempDir::new()?;
        let zip_path = out.path().join("tree.zip");
        let skipped = archive_directory(src.path(), &zip_path, 1024)?;
        assert_eq!(skipped.len(), 1);
        assert!(skipped[0].ends_with("big.bin"));

        let mut archive = ZipArchive::new(File::open(&zip_path)?)?;
        assert_eq!(archive.len(), 1);
        assert!(archive.by_index(0)?.name().ends_with("small.txt"));
        Ok(())
    }

    #[test]
    fn test_add_file_under_prefix() -> anyhow::Result<()> {
        let src = TempDir::new()?;
        fs::write(src.path().join("dump.sql"), b"SELECT 1;")?;

        let out = TempDir::new()?;
        let zip_path = out.path().join("bundle.zip");
        let file = File::create(&zip_path)?;
        let mut builder = ArchiveBuilder::new(file, 1024 * 1024);
        builder.add_file(&src.path().join("dump.sql"), "database")?;
        builder.finish()?;

        let mut archive = ZipArchive::new(File::open(&zip_path)?)?;
        assert_eq!(archive.by_index(0)?.name(), "database/dump.sql");
        Ok(())
    }
}
