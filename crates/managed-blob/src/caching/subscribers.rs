use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::BlobSnapshot;

pub(super) type Callback<T> = Arc<dyn Fn(&BlobSnapshot<T>) + Send + Sync>;

/// The set of callbacks interested in changes of one blob.
pub(super) struct Subscribers<T> {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, Callback<T>)>>,
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            callbacks: Mutex::new(Vec::new()),
        }
    }
}

impl<T> Subscribers<T> {
    pub fn insert(&self, callback: Callback<T>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, callback));
        id
    }

    pub fn remove(&self, id: u64) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(existing, _)| *existing != id);
    }

    /// Returns the currently registered callbacks.
    ///
    /// Callbacks are invoked on this copy, so they are free to (un)subscribe.
    pub fn current(&self) -> Vec<Callback<T>> {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect()
    }
}

/// Execute a callback on dropping of the container type.
///
/// The callback must not panic under any circumstance. Since it is called while dropping an item,
/// this might result in aborting program execution.
struct CallOnDrop {
    f: Option<Box<dyn FnOnce() + Send + Sync + 'static>>,
}

impl CallOnDrop {
    fn new<F: FnOnce() + Send + Sync + 'static>(f: F) -> CallOnDrop {
        CallOnDrop {
            f: Some(Box::new(f)),
        }
    }
}

impl Drop for CallOnDrop {
    fn drop(&mut self) {
        if let Some(f) = self.f.take() {
            f();
        }
    }
}

/// A registered change callback.
///
/// The callback stays registered until [`unsubscribe`](Self::unsubscribe) is called or the
/// subscription is dropped. A subscription does not keep its blob alive.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    _guard: CallOnDrop,
}

impl Subscription {
    pub(super) fn new<F>(unsubscribe: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            _guard: CallOnDrop::new(unsubscribe),
        }
    }

    /// Stops further notifications.
    pub fn unsubscribe(self) {}
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}
