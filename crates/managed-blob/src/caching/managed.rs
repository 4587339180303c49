use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use sentry::{Hub, SentryFutureExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::Instrument;

use crate::diagnostics::ErrorReporter;
use crate::store::BlobStore;

use super::subscribers::{Callback, Subscribers};
use super::{BlobError, BlobKey, BlobResult, RetryPolicy, Subscription, retry};

/// Values that can be kept in a [`ManagedBlob`].
///
/// Blanket-implemented for everything that round-trips through JSON and can be shared between
/// tasks.
pub trait BlobValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> BlobValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Timing knobs of a [`ManagedBlob`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlobOptions {
    /// The quiet period after the last [`ManagedBlob::save_debounced`] before the value is
    /// persisted.
    pub debounce_interval: Duration,
    /// Retry behavior for persisting values.
    pub retry: RetryPolicy,
}

impl Default for BlobOptions {
    fn default() -> Self {
        Self {
            debounce_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }
}

/// The state of a blob as seen by subscribers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobSnapshot<T> {
    /// The last known value, `None` if unknown or absent.
    pub value: Option<T>,
    /// Whether `value` reflects a completed fetch or a local write.
    pub initialized: bool,
    /// Whether a fetch is currently running.
    pub loading: bool,
}

type SharedFetch<T> = Shared<BoxFuture<'static, BlobResult<Option<T>>>>;

struct InflightFetch<T> {
    id: u64,
    future: SharedFetch<T>,
}

/// A debounced write waiting for its timer.
struct ScheduledWrite {
    generation: u64,
    handle: AbortHandle,
}

struct BlobState<T> {
    value: Option<T>,
    initialized: bool,
    loading: bool,
    inflight: Option<InflightFetch<T>>,
    pending_write: Option<ScheduledWrite>,
    /// Source of fetch ids and timer generations.
    next_id: u64,
}

impl<T> BlobState<T> {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Forgets about a running fetch so that its result will not be applied.
    fn detach_fetch(&mut self) {
        if self.inflight.take().is_some() {
            self.loading = false;
        }
    }

    fn cancel_pending_write(&mut self) -> bool {
        match self.pending_write.take() {
            Some(pending) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Replaces the value by a local write.
    fn apply_local(&mut self, value: Option<T>) {
        self.detach_fetch();
        self.initialized = value.is_some();
        self.value = value;
    }
}

struct Inner<T> {
    key: BlobKey,
    store: Arc<dyn BlobStore>,
    reporter: Arc<dyn ErrorReporter>,
    options: BlobOptions,
    state: Mutex<BlobState<T>>,
    subscribers: Subscribers<T>,
}

/// A single JSON document in a remote [`BlobStore`], cached in memory.
///
/// See the [module level documentation](super) for the caching and persistence semantics.
/// Cloning a `ManagedBlob` is cheap and yields a handle to the same state.
pub struct ManagedBlob<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ManagedBlob<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for ManagedBlob<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state();
        f.debug_struct("ManagedBlob")
            .field("key", &self.inner.key)
            .field("initialized", &state.initialized)
            .field("loading", &state.loading)
            .field("pending_write", &state.pending_write.is_some())
            .field("store", &self.inner.store)
            .finish()
    }
}

impl<T: BlobValue> ManagedBlob<T> {
    pub fn new(
        key: BlobKey,
        store: Arc<dyn BlobStore>,
        reporter: Arc<dyn ErrorReporter>,
        options: BlobOptions,
    ) -> Self {
        let state = BlobState {
            value: None,
            initialized: false,
            loading: false,
            inflight: None,
            pending_write: None,
            next_id: 0,
        };

        Self {
            inner: Arc::new(Inner {
                key,
                store,
                reporter,
                options,
                state: Mutex::new(state),
                subscribers: Subscribers::default(),
            }),
        }
    }

    pub fn key(&self) -> &BlobKey {
        &self.inner.key
    }

    /// Whether both handles point to the same blob state.
    pub fn same_blob(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns the value, fetching it from the store if it is not yet known.
    ///
    /// Concurrent calls share a single fetch. A blob that does not exist in the store resolves
    /// to `None` and is not fetched again until [`refetch`](Self::refetch).
    ///
    /// # Errors
    ///
    /// Any store error other than [`BlobError::NotFound`], or [`BlobError::Malformed`] if the
    /// stored document does not parse. The blob stays uninitialized in that case.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime, as the fetch is spawned onto it.
    pub async fn get(&self) -> BlobResult<Option<T>> {
        let (fetch, started) = {
            let mut state = self.inner.state();
            if state.initialized {
                tracing::trace!(key = %self.inner.key, "Serving blob from memory");
                metric!(counter("blob.cache.hit") += 1, "slot" => self.inner.key.slot.as_str());
                return Ok(state.value.clone());
            }

            match &state.inflight {
                Some(inflight) => (inflight.future.clone(), false),
                None => (self.inner.start_fetch(&mut state), true),
            }
        };

        if started {
            self.inner.notify();
        }
        fetch.await
    }

    /// Fetches the value from the store, bypassing the in-memory value.
    ///
    /// If a fetch is already running, its result is awaited instead of starting another one.
    pub async fn refetch(&self) -> BlobResult<Option<T>> {
        let (fetch, started) = {
            let mut state = self.inner.state();
            state.initialized = false;
            match &state.inflight {
                Some(inflight) => (inflight.future.clone(), false),
                None => (self.inner.start_fetch(&mut state), true),
            }
        };

        if started {
            self.inner.notify();
        }
        fetch.await
    }

    /// Stores the value locally and persists it right away.
    ///
    /// A pending debounced write is cancelled first, so it can never overwrite this value.
    /// Subscribers see the new value before the store is contacted.
    ///
    /// # Errors
    ///
    /// The last error once all attempts of the [`RetryPolicy`] failed. The error is also handed
    /// to the [`ErrorReporter`]. The local value is kept either way.
    pub async fn save(&self, value: T) -> BlobResult<()> {
        {
            let mut state = self.inner.state();
            state.cancel_pending_write();
            state.apply_local(Some(value.clone()));
        }

        self.inner.notify();
        self.inner.persist(&value, "direct").await
    }

    /// Stores the value locally and persists it once no further call arrived within the
    /// debounce interval.
    ///
    /// Only the value that is current when the interval elapses is written. Failures are
    /// reported to the [`ErrorReporter`] and otherwise dropped.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime, as the timer is spawned onto it.
    pub fn save_debounced(&self, value: T) {
        let slot = self.inner.key.slot.as_str();
        {
            let mut state = self.inner.state();
            state.apply_local(Some(value));

            let generation = state.next_id();
            let inner = Arc::clone(&self.inner);
            let interval = self.inner.options.debounce_interval;
            let task = async move {
                tokio::time::sleep(interval).await;
                inner.fire_pending_write(generation).await;
            };
            let handle = tokio::spawn(
                task.in_current_span()
                    .bind_hub(Hub::new_from_top(Hub::current())),
            )
            .abort_handle();

            let previous = state
                .pending_write
                .replace(ScheduledWrite { generation, handle });
            match previous {
                Some(previous) => {
                    previous.handle.abort();
                    metric!(counter("blob.debounce.coalesced") += 1, "slot" => slot);
                }
                None => {
                    metric!(counter("blob.debounce.scheduled") += 1, "slot" => slot);
                }
            }
        }

        self.inner.notify();
    }

    /// Persists a pending debounced write immediately.
    ///
    /// Does nothing if no debounced write is pending.
    pub async fn save_pending_changes(&self) -> BlobResult<()> {
        let value = {
            let mut state = self.inner.state();
            if !state.cancel_pending_write() {
                return Ok(());
            }
            state.value.clone()
        };

        match value {
            Some(value) => self.inner.persist(&value, "flush").await,
            None => Ok(()),
        }
    }

    /// Clears the value locally and removes it from the store.
    ///
    /// A pending debounced write is cancelled. A write that already reached the store cannot
    /// be taken back, though.
    pub async fn delete(&self) -> BlobResult<()> {
        {
            let mut state = self.inner.state();
            state.cancel_pending_write();
            state.apply_local(None);
        }

        self.inner.notify();

        let key = &self.inner.key;
        tracing::debug!(key = %key, "Removing blob");
        let result = self.inner.store.remove(key).await;
        metric!(
            counter("blob.delete") += 1,
            "status" => result.as_ref().map_or_else(BlobError::metrics_tag, |_| "ok"),
            "slot" => key.slot.as_str(),
        );
        result
    }

    /// Registers a callback that is invoked after every local state change.
    ///
    /// The callback runs synchronously on the task that made the change.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&BlobSnapshot<T>) + Send + Sync + 'static,
    {
        let callback: Callback<T> = Arc::new(callback);
        let id = self.inner.subscribers.insert(callback);

        let inner = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.subscribers.remove(id);
            }
        })
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state().loading
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.state().initialized
    }

    /// Whether a debounced write is waiting for its timer.
    pub fn has_pending_changes(&self) -> bool {
        self.inner.state().pending_write.is_some()
    }

    /// Returns the in-memory value without any I/O.
    pub fn peek(&self) -> Option<T> {
        let state = self.inner.state();
        match state.initialized {
            true => state.value.clone(),
            false => None,
        }
    }

    pub fn snapshot(&self) -> BlobSnapshot<T> {
        self.inner.snapshot()
    }
}

impl<T> Inner<T> {
    fn state(&self) -> MutexGuard<'_, BlobState<T>> {
        // Subscribers never run under this lock, a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: BlobValue> Inner<T> {
    fn snapshot(&self) -> BlobSnapshot<T> {
        let state = self.state();
        BlobSnapshot {
            value: state.value.clone(),
            initialized: state.initialized,
            loading: state.loading,
        }
    }

    /// Invokes all subscribers with the current state.
    ///
    /// Must not be called while holding the state lock.
    fn notify(&self) {
        let callbacks = self.subscribers.current();
        if callbacks.is_empty() {
            return;
        }

        let snapshot = self.snapshot();
        for callback in callbacks {
            callback(&snapshot);
        }
    }

    /// Spawns a new fetch and registers it as the in-flight one.
    ///
    /// The fetch runs to completion even if every caller waiting for it goes away.
    fn start_fetch(self: &Arc<Self>, state: &mut BlobState<T>) -> SharedFetch<T> {
        let id = state.next_id();
        state.loading = true;

        let (sender, receiver) = oneshot::channel();
        let inner = Arc::clone(self);
        let task = async move {
            sender.send(inner.fetch(id).await).ok();
        };
        tokio::spawn(
            task.in_current_span()
                .bind_hub(Hub::new_from_top(Hub::current())),
        );

        let future = receiver
            .map(|result| result.unwrap_or_else(|err| Err(BlobError::from_std_error(err))))
            .boxed()
            .shared();
        state.inflight = Some(InflightFetch {
            id,
            future: future.clone(),
        });
        future
    }

    async fn fetch(&self, id: u64) -> BlobResult<Option<T>> {
        tracing::debug!(key = %self.key, "Fetching blob");

        let result = match self.store.read(&self.key).await {
            Ok(raw) => serde_json::from_str::<T>(&raw)
                .map(Some)
                .map_err(BlobError::from),
            Err(BlobError::NotFound) => Ok(None),
            Err(err) => Err(err),
        };

        metric!(
            counter("blob.fetch") += 1,
            "status" => match &result {
                Ok(Some(_)) => "ok",
                Ok(None) => "not_found",
                Err(err) => err.metrics_tag(),
            },
            "slot" => self.key.slot.as_str(),
        );

        if let Err(err) = &result {
            tracing::debug!(
                error = err as &dyn std::error::Error,
                key = %self.key,
                "Failed to fetch blob"
            );
        }

        let is_current = {
            let mut state = self.state();
            let is_current = state.inflight.as_ref().is_some_and(|f| f.id == id);
            if is_current {
                state.inflight = None;
                state.loading = false;
                if let Ok(value) = &result {
                    state.value = value.clone();
                    state.initialized = true;
                }
            }
            is_current
        };

        if is_current {
            self.notify();
        } else {
            tracing::debug!(key = %self.key, "Discarding result of detached fetch");
        }

        result
    }

    /// Runs a debounced write, unless it was cancelled or replaced in the meantime.
    async fn fire_pending_write(&self, generation: u64) {
        let value = {
            let mut state = self.state();
            match &state.pending_write {
                Some(pending) if pending.generation == generation => {}
                _ => return,
            }
            state.pending_write = None;
            state.value.clone()
        };

        if let Some(value) = value {
            // failures are reported within `persist`
            self.persist(&value, "debounced").await.ok();
        }
    }

    async fn persist(&self, value: &T, path: &'static str) -> BlobResult<()> {
        let key = &self.key;
        let start = Instant::now();
        let result = match serde_json::to_string(value) {
            Ok(raw) => {
                tracing::debug!(key = %key, path, "Persisting blob");
                retry(&self.options.retry, key, || self.store.write(key, raw.clone())).await
            }
            Err(err) => Err(BlobError::from(err)),
        };

        metric!(
            counter("blob.write") += 1,
            "status" => result.as_ref().map_or_else(BlobError::metrics_tag, |_| "ok"),
            "path" => path,
            "slot" => key.slot.as_str(),
        );
        metric!(
            timer("blob.write.duration") = start.elapsed(),
            "path" => path,
            "slot" => key.slot.as_str(),
        );

        if let Err(err) = &result {
            self.reporter
                .log(&format!("Failed to persist blob `{key}`"), err);
        }
        result
    }
}
