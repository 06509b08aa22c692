use std::path::{Component, Path, PathBuf};

use crate::error::AppError;

/// Maps a client-supplied virtual path onto the content root. Every
/// filesystem-touching operation resolves afresh; resolved paths are never
/// cached across operations because the tree can change between calls.
pub fn resolve(root: &Path, raw: &str) -> Result<PathBuf, AppError> {
    let root = root.canonicalize().map_err(|_| AppError::PathInvalid)?;
    let cleaned = clean_virtual_path(raw)?;
    if cleaned.as_os_str().is_empty() {
        return Ok(root);
    }

    let candidate = root.join(&cleaned);
    let canonical = candidate.canonicalize().map_err(|_| AppError::PathInvalid)?;
    if canonical == root || canonical.starts_with(&root) {
        Ok(canonical)
    } else {
        Err(AppError::PathInvalid)
    }
}

/// Like `resolve`, but for targets that do not exist yet: canonicalizes the
/// nearest existing ancestor and re-joins the remaining segments.
pub fn resolve_creatable(root: &Path, raw: &str) -> Result<PathBuf, AppError> {
    let root = root.canonicalize().map_err(|_| AppError::PathInvalid)?;
    let cleaned = clean_virtual_path(raw)?;
    if cleaned.as_os_str().is_empty() {
        return Ok(root);
    }

    let mut existing = root.clone();
    let mut remainder = PathBuf::new();
    let mut pending = false;
    for part in cleaned.components() {
        if pending {
            remainder.push(part);
            continue;
        }
        let next = existing.join(part);
        if next.is_dir() || next.is_file() {
            existing = next;
        } else {
            pending = true;
            remainder.push(part);
        }
    }

    let canonical = existing.canonicalize().map_err(|_| AppError::PathInvalid)?;
    if canonical != root && !canonical.starts_with(&root) {
        return Err(AppError::PathInvalid);
    }
    Ok(canonical.join(remainder))
}

/// Strips null bytes and rejects any traversal component.
fn clean_virtual_path(raw: &str) -> Result<PathBuf, AppError> {
    if raw.contains('\0') {
        return Err(AppError::PathInvalid);
    }
    let normalized = raw.replace('\\', "/");
    let mut out = PathBuf::new();
    for segment in normalized.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(AppError::PathInvalid),
            other => {
                // A segment must not smuggle its own separator via components.
                match Path::new(other).components().next() {
                    Some(Component::Normal(_)) => out.push(other),
                    _ => return Err(AppError::PathInvalid),
                }
            }
        }
    }
    Ok(out)
}

/// Collapses anything outside `[A-Za-z0-9._-]` to an underscore. Used for
/// client-supplied file and folder names.
pub fn sanitize_name(name: &str) -> Result<String, AppError> {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let stripped = sanitized.trim_matches('.');
    if stripped.is_empty() || stripped.chars().all(|c| c == '_') {
        return Err(AppError::BadRequest("invalid name".to_string()));
    }
    Ok(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_root_maps_to_base() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let resolved = resolve(dir.path(), "/")?;
        assert_eq!(resolved, dir.path().canonicalize()?);
        Ok(())
    }

    #[test]
    fn test_resolve_rejects_traversal() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("a.txt"), b"x")?;
        assert!(resolve(dir.path(), "../etc/passwd").is_err());
        assert!(resolve(dir.path(), "a/../../b").is_err());
        assert!(resolve(dir.path(), "a\0.txt").is_err());
        Ok(())
    }

    #[test]
    fn test_resolve_rejects_symlink_escape() -> anyhow::Result<()> {
        let outside = TempDir::new()?;
        let dir = TempDir::new()?;
        fs::write(outside.path().join("secret.txt"), b"x")?;
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link"))?;
        assert!(resolve(dir.path(), "link/secret.txt").is_err());
        Ok(())
    }

    #[test]
    fn test_resolve_creatable_new_leaf() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::create_dir(dir.path().join("docs"))?;
        let resolved = resolve_creatable(dir.path(), "docs/new.txt")?;
        assert_eq!(resolved, dir.path().canonicalize()?.join("docs/new.txt"));
        Ok(())
    }

    #[test]
    fn test_resolve_creatable_rejects_escape() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        assert!(resolve_creatable(dir.path(), "../outside.txt").is_err());
        Ok(())
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("hello world.txt").unwrap(), "hello_world.txt");
        assert_eq!(sanitize_name("a/b:c").unwrap(), "a_b_c");
        assert!(sanitize_name("...").is_err());
        assert!(sanitize_name("   ").is_err());
        assert!(sanitize_name("///").is_err());
    }
}
