//! Bundles: the unit of transfer.
//!
//! A fetch command produces a [`Bundle`]: an opaque identifier plus the
//! file records it covers, each with a backend-resolved byte source. The
//! bundle is owned by the server-wide [`BundleTable`] and, non-exclusively,
//! by the requesting connection's disposable set. It is destroyed by
//! whichever of {connection disposal, transport delivery completion}
//! happens first; after that the id is invalid and transport reads against
//! it fail with not-found.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use protocol::messages::FileRecord;
use rand::RngCore;
use thiserror::Error;
use tracing::debug;

use crate::dispose::{Disposable, DisposeError};

/// Number of random bytes in a bundle id (256-bit).
pub const BUNDLE_ID_BYTES: usize = 32;

/// Errors from bundle table operations.
#[derive(Debug, Error)]
pub enum BundleError {
    /// A bundle with this id is already registered. With 256-bit random
    /// ids this indicates a programming error, not bad luck.
    #[error("duplicate bundle id: {0}")]
    DuplicateId(String),
}

/// Generate a fresh 256-bit random bundle id, hex-encoded.
pub fn new_bundle_id() -> String {
    let mut bytes = [0u8; BUNDLE_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// A file record paired with the backend-resolved location of its bytes.
#[derive(Debug, Clone)]
pub struct BundleFile {
    /// Wire-level record for this file.
    pub record: FileRecord,
    /// Host path the transport streams bytes from.
    pub source: PathBuf,
}

/// The addressable unit representing the result of a fetch, later streamed
/// by a transport.
pub struct Bundle {
    id: String,
    files: Vec<BundleFile>,
    delivered: Mutex<HashSet<usize>>,
}

impl Bundle {
    /// Construct a bundle. Assigning a fresh id via [`new_bundle_id`] is
    /// the caller's responsibility.
    pub fn create(id: String, files: Vec<BundleFile>) -> Self {
        Self {
            id,
            files,
            delivered: Mutex::new(HashSet::new()),
        }
    }

    /// The bundle's opaque identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Files in delivery order.
    pub fn files(&self) -> &[BundleFile] {
        &self.files
    }

    /// Wire records of the files, in delivery order.
    pub fn file_records(&self) -> Vec<FileRecord> {
        self.files.iter().map(|f| f.record.clone()).collect()
    }

    /// Mark one file as fully delivered. Returns true once every file in
    /// the bundle has been delivered at least once.
    pub fn mark_delivered(&self, index: usize) -> bool {
        let mut delivered = self.delivered.lock().expect("delivery set poisoned");
        delivered.insert(index);
        delivered.len() == self.files.len()
    }
}

/// Server-wide table of live bundles, keyed by id.
///
/// Insertion and removal are atomic with respect to interleaved command
/// handling: a transport either sees a fully registered bundle or none.
#[derive(Default)]
pub struct BundleTable {
    bundles: DashMap<String, Arc<Bundle>>,
}

impl BundleTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bundle. Duplicate ids are rejected.
    pub fn insert(&self, bundle: Arc<Bundle>) -> Result<(), BundleError> {
        match self.bundles.entry(bundle.id().to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(BundleError::DuplicateId(bundle.id().to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(bundle);
                Ok(())
            }
        }
    }

    /// Look up a live bundle.
    pub fn get(&self, id: &str) -> Option<Arc<Bundle>> {
        self.bundles.get(id).map(|b| b.value().clone())
    }

    /// Remove a bundle, invalidating its id. Idempotent: removing an
    /// absent id returns false.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.bundles.remove(id).is_some();
        if removed {
            debug!(bundle_id = id, "bundle removed");
        }
        removed
    }

    /// Number of live bundles.
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    /// Whether the table holds no bundles.
    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}

/// Connection-owned claim on a bundle: disposing it removes the bundle
/// from the table. Removal is idempotent, so the claim coexists with the
/// transport's own delivery-completion removal.
pub struct BundleClaim {
    table: Arc<BundleTable>,
    id: String,
}

impl BundleClaim {
    /// Create a claim for the bundle with the given id.
    pub fn new(table: Arc<BundleTable>, id: String) -> Self {
        Self { table, id }
    }
}

#[async_trait]
impl Disposable for BundleClaim {
    async fn dispose(&self) -> Result<(), DisposeError> {
        self.table.remove(&self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle_with_files(id: &str, count: usize) -> Arc<Bundle> {
        let files = (0..count)
            .map(|i| BundleFile {
                record: FileRecord::file(format!("f{i}"), 1, 0),
                source: PathBuf::from(format!("/tmp/f{i}")),
            })
            .collect();
        Arc::new(Bundle::create(id.to_string(), files))
    }

    #[test]
    fn test_bundle_id_shape() {
        let id = new_bundle_id();
        assert_eq!(id.len(), BUNDLE_ID_BYTES * 2);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_bundle_id());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let table = BundleTable::new();
        table.insert(bundle_with_files("dup", 1)).unwrap();
        let err = table.insert(bundle_with_files("dup", 1)).unwrap_err();
        assert!(matches!(err, BundleError::DuplicateId(id) if id == "dup"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let table = BundleTable::new();
        table.insert(bundle_with_files("x", 1)).unwrap();
        assert!(table.remove("x"));
        assert!(!table.remove("x"));
        assert!(table.get("x").is_none());
    }

    #[test]
    fn test_mark_delivered_completes_once_all_files_seen() {
        let bundle = bundle_with_files("b", 2);
        assert!(!bundle.mark_delivered(0));
        assert!(!bundle.mark_delivered(0));
        assert!(bundle.mark_delivered(1));
    }

    #[tokio::test]
    async fn test_claim_disposal_removes_bundle() {
        let table = Arc::new(BundleTable::new());
        table.insert(bundle_with_files("c", 1)).unwrap();

        let claim = BundleClaim::new(table.clone(), "c".to_string());
        claim.dispose().await.unwrap();
        assert!(table.get("c").is_none());

        // Disposing again after the transport already removed it is fine.
        claim.dispose().await.unwrap();
    }
}
