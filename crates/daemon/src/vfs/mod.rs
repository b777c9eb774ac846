//! Virtual filesystem layer.
//!
//! A [`FileSystem`] is the capability a backend exposes: list a virtual
//! path, or fetch it as a set of file records with byte sources. The
//! [`DeviceRegistry`] composes backends into one addressable tree by
//! mounting each under a virtual endpoint.

pub mod native;
pub mod registry;

use async_trait::async_trait;
use protocol::messages::FileRecord;
use thiserror::Error;

use crate::bundle::BundleFile;

pub use native::NativeFileSystem;
pub use registry::DeviceRegistry;

/// Errors from virtual filesystem operations.
///
/// Backend-level host errors are translated to `NotFound`/`AccessDenied`
/// here; raw OS errors never cross this boundary.
#[derive(Debug, Error)]
pub enum VfsError {
    /// No mount endpoint is a prefix of the path.
    #[error("no mount for path: {0}")]
    NoSuchMount(String),

    /// The backend has no entry at the path.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend refused access to the path.
    #[error("access denied: {0}")]
    AccessDenied(String),
}

/// Capability interface of a filesystem backend.
///
/// Paths are virtual: forward-slash separated, already stripped of the
/// mount endpoint, with `""` meaning the backend's own root. Records are
/// produced fresh per call and never cached across requests.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// List the entries of a virtual directory.
    async fn list(&self, path: &str) -> Result<Vec<FileRecord>, VfsError>;

    /// Resolve a virtual path to transferable files with byte sources.
    /// Fetching a directory yields one entry per contained regular file,
    /// named relative to the fetch root.
    async fn fetch(&self, path: &str) -> Result<Vec<BundleFile>, VfsError>;
}
