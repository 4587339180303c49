use std::fmt;
use std::sync::Arc;

use futures::future;

use crate::diagnostics::ErrorReporter;
use crate::store::BlobStore;

use super::{BlobKey, BlobOptions, BlobResult, BlobValue, ManagedBlob, OwnerId, Slot};

/// Hands out one shared [`ManagedBlob`] per owner id for a single slot.
///
/// All lookups for the same owner return handles to the same blob, so they share the in-memory
/// value, the in-flight fetch, the pending write and the subscribers.
pub struct BlobRegistry<T> {
    slot: Slot,
    store: Arc<dyn BlobStore>,
    reporter: Arc<dyn ErrorReporter>,
    options: BlobOptions,
    entries: moka::sync::Cache<OwnerId, ManagedBlob<T>>,
}

impl<T: BlobValue> fmt::Debug for BlobRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobRegistry")
            .field("slot", &self.slot)
            .field("entries", &self.entries.entry_count())
            .field("store", &self.store)
            .field("options", &self.options)
            .finish()
    }
}

impl<T: BlobValue> BlobRegistry<T> {
    pub fn new(
        slot: impl Into<Slot>,
        store: Arc<dyn BlobStore>,
        reporter: Arc<dyn ErrorReporter>,
        options: BlobOptions,
    ) -> Self {
        let slot = slot.into();
        let entries = moka::sync::Cache::builder()
            .name(slot.as_str())
            .build();

        Self {
            slot,
            store,
            reporter,
            options,
            entries,
        }
    }

    pub fn slot(&self) -> &Slot {
        &self.slot
    }

    /// Returns the blob of the given owner, creating it on first access.
    pub fn get(&self, owner: impl Into<OwnerId>) -> ManagedBlob<T> {
        let owner = owner.into();
        self.entries.get_with_by_ref(&owner, || {
            tracing::trace!(owner = %owner, slot = %self.slot, "Creating managed blob");
            ManagedBlob::new(
                BlobKey::new(owner.clone(), self.slot.clone()),
                Arc::clone(&self.store),
                Arc::clone(&self.reporter),
                self.options,
            )
        })
    }

    /// Drops the registry's handle to the blob of the given owner.
    ///
    /// Handles held elsewhere stay valid, and a pending debounced write still fires. The next
    /// [`get`](Self::get) creates a fresh, uninitialized blob.
    pub fn forget(&self, owner: &OwnerId) {
        self.entries.invalidate(owner);
    }

    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persists the pending debounced writes of all blobs, e.g. before shutting down.
    ///
    /// All blobs are flushed even if some of them fail; the first error is returned.
    pub async fn save_all_pending(&self) -> BlobResult<()> {
        let blobs: Vec<_> = self
            .entries
            .iter()
            .map(|(_, blob)| blob)
            .filter(|blob| blob.has_pending_changes())
            .collect();

        tracing::debug!(slot = %self.slot, count = blobs.len(), "Flushing pending blob writes");
        let results = future::join_all(blobs.iter().map(|blob| blob.save_pending_changes())).await;
        results.into_iter().collect()
    }
}
