//! Local filesystem probing
//!
//! The planner and the transaction only ever touch the filesystem through
//! `FilesystemProbe`, which keeps classification testable without a real
//! `/data` tree.

use std::io;
use std::path::{Path, PathBuf};

/// Filesystem questions asked while planning a deployment
pub trait FilesystemProbe: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    /// Final path component, empty when there is none
    fn basename(&self, path: &str) -> String {
        basename(path)
    }

    /// Create `path` and its parents. Existing directories are not an error.
    fn make_dirs(&self, path: &Path) -> io::Result<()>;
}

/// Probe backed by the real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFilesystem;

impl FilesystemProbe for LocalFilesystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn make_dirs(&self, path: &Path) -> io::Result<()> {
        if path.is_dir() {
            return Ok(());
        }
        tracing::info!("Creating directory {}", path.display());
        std::fs::create_dir_all(path)
    }
}

/// Last non-empty `/`-separated component of a path or URL path
pub fn basename(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// `dir/basename(source)` with any leading slashes of the name stripped.
///
/// A source ending in `/` names a directory, not a file, and has no local
/// copy. Percent-escapes are kept as written, so `%2F` never becomes a
/// path separator.
pub fn local_copy_path(dir: &Path, source: &str) -> Option<PathBuf> {
    if source.ends_with('/') {
        return None;
    }
    let name = basename(source);
    let name = name.trim_start_matches('/');
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(dir.join(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_basename() {
        assert_eq!(basename("/images/engine.iso"), "engine.iso");
        assert_eq!(basename("engine.iso"), "engine.iso");
        assert_eq!(basename("/images/dir/"), "dir");
        assert_eq!(basename(""), "");
    }

    #[test]
    fn test_local_copy_path_rejects_dot_names() {
        let dir = Path::new("/data/setup");
        assert_eq!(
            local_copy_path(dir, "/pub/engine.ova"),
            Some(PathBuf::from("/data/setup/engine.ova"))
        );
        assert_eq!(local_copy_path(dir, "/pub/.."), None);
        assert_eq!(local_copy_path(dir, "/"), None);
    }

    #[test]
    fn test_local_copy_path_rejects_directory_urls() {
        let dir = Path::new("/data/setup");
        assert_eq!(local_copy_path(dir, "/pub/dir/"), None);
        assert_eq!(local_copy_path(dir, "/pub/dir//"), None);
        assert_eq!(
            local_copy_path(dir, "/pub/my%2Fimage.iso"),
            Some(PathBuf::from("/data/setup/my%2Fimage.iso"))
        );
    }

    #[test]
    fn test_make_dirs_is_idempotent() {
        let root = TempDir::new().unwrap();
        let nested = root.path().join("a/b/c");
        let probe = LocalFilesystem;

        probe.make_dirs(&nested).unwrap();
        assert!(nested.is_dir());
        probe.make_dirs(&nested).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn test_exists() {
        let root = TempDir::new().unwrap();
        let probe = LocalFilesystem;
        assert!(probe.exists(root.path()));
        assert!(!probe.exists(&root.path().join("missing")));
    }
}
