//! Mount registry composing backends into one virtual tree.
//!
//! The registry owns the mapping from virtual mount endpoint to backend.
//! Resolution is longest-prefix on segment boundaries; the remainder after
//! stripping the endpoint is passed to the backend untouched. Mounts are
//! created at construction or via `mount` and live for the registry's
//! lifetime; there is no unmount.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::RwLock;

use protocol::messages::FileRecord;
use protocol::vpath;
use tracing::{debug, info};

use crate::bundle::BundleFile;
use crate::vfs::{FileSystem, VfsError};

/// Registry of mounted filesystem backends.
#[derive(Default)]
pub struct DeviceRegistry {
    mounts: RwLock<BTreeMap<String, Arc<dyn FileSystem>>>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount a backend under a virtual endpoint.
    ///
    /// Endpoints are unique keys: mounting over an existing endpoint
    /// replaces the mapping (last write wins, no merge).
    pub fn mount(&self, endpoint: &str, fs: Arc<dyn FileSystem>) {
        let endpoint = vpath::normalize(endpoint);
        let replaced = {
            let mut mounts = self.mounts.write().expect("mount table poisoned");
            mounts.insert(endpoint.clone(), fs).is_some()
        };
        if replaced {
            info!(endpoint = %endpoint, "mount replaced");
        } else {
            info!(endpoint = %endpoint, "mounted");
        }
    }

    /// Normalized endpoints of all mounts, in sorted order.
    pub fn endpoints(&self) -> Vec<String> {
        let mounts = self.mounts.read().expect("mount table poisoned");
        mounts.keys().cloned().collect()
    }

    /// Resolve a virtual path to the owning backend.
    ///
    /// Longest-prefix match against registered endpoints; returns the
    /// backend, the matched endpoint, and the remainder to pass through.
    pub fn resolve(&self, path: &str) -> Result<ResolvedMount, VfsError> {
        let path = vpath::normalize(path);
        let mounts = self.mounts.read().expect("mount table poisoned");

        let mut best: Option<(&String, &Arc<dyn FileSystem>, String)> = None;
        for (endpoint, fs) in mounts.iter() {
            if let Some(remainder) = vpath::strip_prefix(&path, endpoint) {
                let longer = best
                    .as_ref()
                    .map(|(current, _, _)| endpoint.len() > current.len())
                    .unwrap_or(true);
                if longer {
                    best = Some((endpoint, fs, remainder));
                }
            }
        }

        match best {
            Some((endpoint, fs, remainder)) => {
                debug!(path = %path, endpoint = %endpoint, "resolved mount");
                Ok(ResolvedMount {
                    endpoint: endpoint.clone(),
                    backend: fs.clone(),
                    remainder,
                })
            }
            None => Err(VfsError::NoSuchMount(path)),
        }
    }

    /// List a virtual path.
    ///
    /// Resolves to a backend and delegates. When no mount owns the path
    /// but the path is a proper prefix of mount endpoints (e.g. the root
    /// with mounts `a` and `b`), the registry synthesizes one directory
    /// record per next endpoint segment.
    pub async fn list(&self, path: &str) -> Result<Vec<FileRecord>, VfsError> {
        let resolved = match self.resolve(path) {
            Ok(resolved) => resolved,
            Err(VfsError::NoSuchMount(normalized)) => {
                let synthesized = self.mount_point_records(&normalized);
                return if synthesized.is_empty() {
                    Err(VfsError::NoSuchMount(normalized))
                } else {
                    Ok(synthesized)
                };
            }
            Err(other) => return Err(other),
        };

        resolved.backend.list(&resolved.remainder).await
    }

    /// Fetch a virtual path as transferable files.
    ///
    /// A fetch always targets exactly one resolved backend; paths spanning
    /// multiple mounts are not supported.
    pub async fn fetch(&self, path: &str) -> Result<Vec<BundleFile>, VfsError> {
        let resolved = self.resolve(path)?;
        resolved.backend.fetch(&resolved.remainder).await
    }

    /// Directory records for the endpoint segments directly under `path`.
    fn mount_point_records(&self, path: &str) -> Vec<FileRecord> {
        let mounts = self.mounts.read().expect("mount table poisoned");

        let mut names: Vec<String> = Vec::new();
        for endpoint in mounts.keys() {
            let Some(remainder) = vpath::strip_prefix(endpoint, path) else {
                continue;
            };
            let Some(first) = vpath::segments(&remainder).into_iter().next() else {
                continue;
            };
            if !names.contains(&first) {
                names.push(first);
            }
        }

        names.sort();
        names
            .into_iter()
            .map(|name| FileRecord::directory(name, 0))
            .collect()
    }
}

/// Result of resolving a virtual path against the mount table.
pub struct ResolvedMount {
    /// Endpoint that matched.
    pub endpoint: String,
    /// The backend mounted there.
    pub backend: Arc<dyn FileSystem>,
    /// Path remainder after stripping the endpoint.
    pub remainder: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::NativeFileSystem;
    use async_trait::async_trait;
    use protocol::messages::FileKind;
    use std::fs;
    use tempfile::TempDir;

    /// Backend that records which remainder it was asked for.
    struct Probe {
        label: &'static str,
    }

    #[async_trait]
    impl FileSystem for Probe {
        async fn list(&self, path: &str) -> Result<Vec<FileRecord>, VfsError> {
            Ok(vec![FileRecord::file(
                format!("{}:{}", self.label, path),
                0,
                0,
            )])
        }

        async fn fetch(&self, path: &str) -> Result<Vec<BundleFile>, VfsError> {
            Ok(vec![BundleFile {
                record: FileRecord::file(format!("{}:{}", self.label, path), 0, 0),
                source: std::path::PathBuf::new(),
            }])
        }
    }

    fn probe(label: &'static str) -> Arc<dyn FileSystem> {
        Arc::new(Probe { label })
    }

    #[tokio::test]
    async fn test_longest_prefix_wins() {
        let registry = DeviceRegistry::new();
        registry.mount("a", probe("short"));
        registry.mount("a/b", probe("long"));

        let records = registry.list("a/b/c").await.unwrap();
        assert_eq!(records[0].name, "long:c");

        let records = registry.list("a/x").await.unwrap();
        assert_eq!(records[0].name, "short:x");
    }

    #[tokio::test]
    async fn test_prefix_match_respects_segment_boundaries() {
        let registry = DeviceRegistry::new();
        registry.mount("a", probe("a"));

        let err = registry.fetch("ab").await.unwrap_err();
        assert!(matches!(err, VfsError::NoSuchMount(p) if p == "ab"));
    }

    #[tokio::test]
    async fn test_resolve_under_any_endpoint_suffix() {
        let registry = DeviceRegistry::new();
        registry.mount("docs/shared", probe("docs"));

        let resolved = registry
            .resolve(&vpath::join("docs/shared", "x"))
            .unwrap();
        assert_eq!(resolved.endpoint, "docs/shared");
        assert_eq!(resolved.remainder, "x");
    }

    #[tokio::test]
    async fn test_mount_overwrite_is_last_write_wins() {
        let registry = DeviceRegistry::new();
        registry.mount("a", probe("first"));
        registry.mount("a", probe("second"));

        assert_eq!(registry.endpoints(), vec!["a"]);
        let records = registry.list("a").await.unwrap();
        assert_eq!(records[0].name, "second:");
    }

    #[tokio::test]
    async fn test_root_listing_synthesizes_mount_points() {
        let registry = DeviceRegistry::new();
        registry.mount("a", probe("a"));
        registry.mount("b", probe("b"));

        let records = registry.list("").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "a");
        assert_eq!(records[0].kind, FileKind::Directory);
        assert_eq!(records[1].name, "b");
        assert_eq!(records[1].kind, FileKind::Directory);
    }

    #[tokio::test]
    async fn test_fetch_unmounted_path_is_no_such_mount() {
        let registry = DeviceRegistry::new();
        registry.mount("a", probe("a"));

        let err = registry.fetch("zzz/file").await.unwrap_err();
        assert!(matches!(err, VfsError::NoSuchMount(_)));

        // Listing root synthesizes, but fetching root does not.
        let err = registry.fetch("").await.unwrap_err();
        assert!(matches!(err, VfsError::NoSuchMount(_)));
    }

    #[tokio::test]
    async fn test_root_mount_delegates_root_listing() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("only.txt"), "x").unwrap();

        let registry = DeviceRegistry::new();
        registry.mount("/", Arc::new(NativeFileSystem::new(temp.path())));

        let records = registry.list("").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "only.txt");
    }
}
