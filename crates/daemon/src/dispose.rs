//! Resource disposal chain.
//!
//! Anything holding external state that must be released when its owner is
//! torn down implements [`Disposable`]. Owners collect disposables in a
//! [`DisposableSet`], which releases every entry exactly once, in
//! registration order, when the owner goes away.
//!
//! Registration returns an opaque [`DisposeHandle`]; removal takes the
//! handle directly, so no equality scan is needed and removing an absent
//! entry is a no-op. A failing disposal never prevents the remaining
//! disposals from running; all failures are collected and reported
//! together.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

/// Error produced by a single failed disposal.
#[derive(Debug, Error)]
#[error("dispose failed: {0}")]
pub struct DisposeError(pub String);

impl DisposeError {
    /// Create a dispose error from any displayable cause.
    pub fn new(cause: impl fmt::Display) -> Self {
        Self(cause.to_string())
    }
}

/// Aggregate error from disposing a set: every entry was attempted, these
/// are the ones that failed, keyed by registration index.
#[derive(Debug)]
pub struct DisposalFailures {
    /// Number of disposals attempted.
    pub attempted: usize,
    /// Failures as (registration index, error) pairs.
    pub failures: Vec<(usize, DisposeError)>,
}

impl fmt::Display for DisposalFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} disposals failed",
            self.failures.len(),
            self.attempted
        )?;
        for (index, err) in &self.failures {
            write!(f, "; [{index}] {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for DisposalFailures {}

/// A resource that must release external state exactly once when its owner
/// is torn down. `dispose` is expected to be idempotent on a best-effort
/// basis; the container only guarantees it calls each entry once.
#[async_trait]
pub trait Disposable: Send + Sync {
    /// Release the resource.
    async fn dispose(&self) -> Result<(), DisposeError>;
}

/// Opaque handle identifying a registered disposable within the set that
/// issued it. Handles carry their owning set's identity; presenting one
/// to a different set is a no-op rather than an index into the wrong
/// arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisposeHandle {
    owner: u64,
    index: usize,
}

static NEXT_SET_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Default)]
struct Slots {
    entries: Vec<Option<Arc<dyn Disposable>>>,
    disposed: bool,
}

/// An ordered collection of disposables.
///
/// Entries are disposed sequentially in registration order, each awaited
/// before the next, so a later-registered disposable can assume an earlier
/// one already released its resource.
pub struct DisposableSet {
    id: u64,
    slots: Mutex<Slots>,
}

impl Default for DisposableSet {
    fn default() -> Self {
        Self::new()
    }
}

impl DisposableSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            id: NEXT_SET_ID.fetch_add(1, Ordering::Relaxed),
            slots: Mutex::new(Slots::default()),
        }
    }

    /// Register a disposable and return its handle.
    ///
    /// If the set was already disposed, the entry is disposed immediately
    /// and the returned handle refers to nothing.
    pub async fn add(&self, disposable: Arc<dyn Disposable>) -> DisposeHandle {
        let (index, late) = {
            let mut slots = self.slots.lock().await;
            let late = if slots.disposed {
                slots.entries.push(None);
                Some(disposable)
            } else {
                slots.entries.push(Some(disposable));
                None
            };
            (slots.entries.len() - 1, late)
        };

        if let Some(disposable) = late {
            if let Err(err) = disposable.dispose().await {
                warn!(%err, "late-registered disposable failed to dispose");
            }
        }

        DisposeHandle {
            owner: self.id,
            index,
        }
    }

    /// Remove a disposable by handle without disposing it.
    ///
    /// Removing an absent or already-removed handle is a no-op, as is
    /// presenting a handle issued by a different set.
    pub async fn remove(&self, handle: DisposeHandle) -> Option<Arc<dyn Disposable>> {
        if handle.owner != self.id {
            return None;
        }
        let mut slots = self.slots.lock().await;
        slots.entries.get_mut(handle.index).and_then(Option::take)
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let slots = self.slots.lock().await;
        slots.entries.iter().flatten().count()
    }

    /// Whether the set holds no live entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Dispose every entry in registration order.
    ///
    /// Entries are taken out of the set first, so a second call is a
    /// no-op. Each disposal is awaited before the next; a failure does not
    /// stop the remaining disposals, and all failures are reported in the
    /// returned aggregate.
    pub async fn dispose_all(&self) -> Result<(), DisposalFailures> {
        let entries = {
            let mut slots = self.slots.lock().await;
            if slots.disposed {
                return Ok(());
            }
            slots.disposed = true;
            std::mem::take(&mut slots.entries)
        };

        let mut attempted = 0;
        let mut failures = Vec::new();

        for (index, entry) in entries.into_iter().enumerate() {
            let Some(disposable) = entry else { continue };
            attempted += 1;
            if let Err(err) = disposable.dispose().await {
                failures.push((index, err));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DisposalFailures {
                attempted,
                failures,
            })
        }
    }
}

#[async_trait]
impl Disposable for DisposableSet {
    async fn dispose(&self) -> Result<(), DisposeError> {
        self.dispose_all().await.map_err(DisposeError::new)
    }
}
