//! Native filesystem backend.
//!
//! Adapts a single host directory to the [`FileSystem`] capability. Every
//! call is a scoped read: virtual paths are normalized, resolved against
//! the root, and canonicalized, and the result must stay inside the root.
//! Host-level errors surface as `NotFound`/`AccessDenied`, never as raw
//! OS errors.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use protocol::messages::{FileKind, FileRecord};
use protocol::vpath;
use walkdir::WalkDir;

use crate::bundle::BundleFile;
use crate::vfs::{FileSystem, VfsError};

/// A filesystem backend over one host directory tree.
pub struct NativeFileSystem {
    root: PathBuf,
}

impl NativeFileSystem {
    /// Create a backend rooted at the given host directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The host directory this backend serves.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a virtual path to a canonical host path inside the root.
    fn resolve(&self, path: &str) -> Result<PathBuf, VfsError> {
        let normalized = vpath::normalize(path);

        let root = fs::canonicalize(&self.root)
            .map_err(|e| translate_io_error(&e, &self.root.to_string_lossy()))?;

        let mut host = root.clone();
        for segment in vpath::segments(&normalized) {
            host.push(segment);
        }

        let canonical = fs::canonicalize(&host).map_err(|e| translate_io_error(&e, &normalized))?;

        // Symlinks can point anywhere; the canonical form must stay scoped.
        if !canonical.starts_with(&root) {
            return Err(VfsError::AccessDenied(normalized));
        }

        Ok(canonical)
    }
}

#[async_trait]
impl FileSystem for NativeFileSystem {
    async fn list(&self, path: &str) -> Result<Vec<FileRecord>, VfsError> {
        let host = self.resolve(path)?;

        let metadata = fs::metadata(&host).map_err(|e| translate_io_error(&e, path))?;
        if !metadata.is_dir() {
            return Err(VfsError::NotFound(vpath::normalize(path)));
        }

        let entries = fs::read_dir(&host).map_err(|e| translate_io_error(&e, path))?;

        let mut records = Vec::new();
        for entry in entries {
            // Entries that disappear or can't be stat'ed are skipped.
            let Ok(entry) = entry else { continue };
            let Ok(metadata) = entry.metadata() else {
                continue;
            };

            let name = entry.file_name().to_string_lossy().to_string();
            let modified_at = epoch_seconds(metadata.modified().ok());

            let record = if metadata.is_dir() {
                FileRecord::directory(name, modified_at)
            } else if metadata.is_file() {
                FileRecord::file(name, metadata.len(), modified_at)
            } else {
                continue;
            };
            records.push(record);
        }

        // Directories first, then files, both case-insensitively by name.
        records.sort_by(|a, b| {
            let a_is_dir = a.kind == FileKind::Directory;
            let b_is_dir = b.kind == FileKind::Directory;
            match (a_is_dir, b_is_dir) {
                (true, false) => std::cmp::Ordering::Less,
                (false, true) => std::cmp::Ordering::Greater,
                _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
            }
        });

        Ok(records)
    }

    async fn fetch(&self, path: &str) -> Result<Vec<BundleFile>, VfsError> {
        let host = self.resolve(path)?;

        let metadata = fs::metadata(&host).map_err(|e| translate_io_error(&e, path))?;

        if metadata.is_file() {
            let name = vpath::basename(path);
            let name = if name.is_empty() {
                host.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default()
            } else {
                name
            };
            return Ok(vec![BundleFile {
                record: FileRecord::file(name, metadata.len(), epoch_seconds(metadata.modified().ok())),
                source: host,
            }]);
        }

        // Directory fetch: every regular file underneath, named by its
        // path relative to the fetch root.
        let mut files = Vec::new();
        for entry in WalkDir::new(&host).follow_links(false) {
            let Ok(entry) = entry else { continue };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let Ok(relative) = entry.path().strip_prefix(&host) else {
                continue;
            };

            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            files.push(BundleFile {
                record: FileRecord::file(name, metadata.len(), epoch_seconds(metadata.modified().ok())),
                source: entry.path().to_path_buf(),
            });
        }

        files.sort_by(|a, b| a.record.name.cmp(&b.record.name));
        Ok(files)
    }
}

/// Translate a host I/O error into the backend error taxonomy.
fn translate_io_error(err: &std::io::Error, path: &str) -> VfsError {
    match err.kind() {
        std::io::ErrorKind::PermissionDenied => VfsError::AccessDenied(path.to_string()),
        _ => VfsError::NotFound(path.to_string()),
    }
}

fn epoch_seconds(time: Option<SystemTime>) -> u64 {
    time.and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_tree(dir: &Path) {
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::write(dir.join("readme.txt"), "hello").unwrap();
        fs::write(dir.join("sub/inner.txt"), "inner bytes").unwrap();
    }

    #[tokio::test]
    async fn test_list_root() {
        let temp = TempDir::new().unwrap();
        create_tree(temp.path());

        let fs = NativeFileSystem::new(temp.path());
        let records = fs.list("").await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "sub");
        assert_eq!(records[0].kind, FileKind::Directory);
        assert_eq!(records[1].name, "readme.txt");
        assert_eq!(records[1].size, 5);
    }

    #[tokio::test]
    async fn test_list_subdirectory() {
        let temp = TempDir::new().unwrap();
        create_tree(temp.path());

        let fs = NativeFileSystem::new(temp.path());
        let records = fs.list("sub").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "inner.txt");
    }

    #[tokio::test]
    async fn test_list_missing_path_is_not_found() {
        let temp = TempDir::new().unwrap();
        let fs = NativeFileSystem::new(temp.path());
        let err = fs.list("nope").await.unwrap_err();
        assert!(matches!(err, VfsError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fetch_single_file() {
        let temp = TempDir::new().unwrap();
        create_tree(temp.path());

        let fs = NativeFileSystem::new(temp.path());
        let files = fs.fetch("readme.txt").await.unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].record.name, "readme.txt");
        assert_eq!(files[0].record.size, 5);
        assert_eq!(fs::read(&files[0].source).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_fetch_directory_is_recursive() {
        let temp = TempDir::new().unwrap();
        create_tree(temp.path());

        let fs = NativeFileSystem::new(temp.path());
        let files = fs.fetch("").await.unwrap();

        let names: Vec<&str> = files.iter().map(|f| f.record.name.as_str()).collect();
        assert_eq!(names, vec!["readme.txt", "sub/inner.txt"]);
    }

    #[tokio::test]
    async fn test_traversal_cannot_escape_root() {
        let temp = TempDir::new().unwrap();
        create_tree(temp.path());

        let fs = NativeFileSystem::new(temp.path().join("sub"));
        // ".." normalizes away before touching the host filesystem.
        let err = fs.fetch("../readme.txt").await.unwrap_err();
        assert!(matches!(err, VfsError::NotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_outside_root_is_denied() {
        use std::os::unix::fs::symlink;

        let temp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.txt"), "secret").unwrap();
        symlink(outside.path().join("secret.txt"), temp.path().join("link")).unwrap();

        let fs = NativeFileSystem::new(temp.path());
        let err = fs.fetch("link").await.unwrap_err();
        assert!(matches!(err, VfsError::AccessDenied(_)));
    }
}
