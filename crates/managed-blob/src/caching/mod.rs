//! # Managed blob caching
//!
//! Every document the chat client keeps on the backend (chat settings, memories, the story
//! itself, ...) is a single JSON value stored under a [`BlobKey`], which is the pair of an
//! [`OwnerId`] (usually a chat id) and a [`Slot`] (the name of the document).
//! A [`ManagedBlob`] wraps one such document and is the only thing callers talk to.
//!
//! ## Reads
//!
//! A [`ManagedBlob`] starts out uninitialized. The first [`ManagedBlob::get`] fetches the
//! document from the [`BlobStore`](crate::store::BlobStore) and keeps the parsed value in
//! memory; every later `get` is answered from memory without any I/O. Concurrent `get`s that
//! arrive while the fetch is still running all share that one fetch (request coalescing).
//!
//! A [`BlobError::NotFound`] from the store is not an error: it is remembered as a settled
//! "absent" value and `get` resolves to `None`. Any other failure is returned to every waiting
//! caller and the blob stays uninitialized, so the next `get` tries again.
//! [`ManagedBlob::refetch`] bypasses the in-memory value and goes to the store, joining a fetch
//! that is already running. A fetch is spawned onto the runtime and completes even if all of
//! its callers are dropped, so `is_loading` never outlives the request.
//!
//! ## Writes
//!
//! All writes update the in-memory value and notify subscribers *before* any I/O happens, so
//! the UI never waits on the network.
//!
//! - [`ManagedBlob::save`] persists right away and returns the outcome.
//! - [`ManagedBlob::save_debounced`] (re)arms a timer. Only when no further debounced save
//!   arrives within [`BlobOptions::debounce_interval`] is the value that is current *at that
//!   moment* persisted. N rapid edits thus result in exactly one write.
//! - [`ManagedBlob::save_pending_changes`] persists an armed timer's value immediately, for
//!   example before navigating away.
//! - [`ManagedBlob::delete`] disarms the timer, clears the value and removes the document.
//!
//! Persisting goes through [`retry`] with the configured [`RetryPolicy`]: a failed write is
//! retried with a linearly growing delay. Once all attempts are used up the failure is handed
//! to the [`ErrorReporter`](crate::diagnostics::ErrorReporter). `save` and
//! `save_pending_changes` also return it; the timer-driven write has nobody to return it to.
//!
//! ## Local writes win
//!
//! Any local change (`save`, `save_debounced`, `delete`) detaches a fetch that is still in
//! flight. The detached fetch still resolves for the callers already waiting on it,
//! but its result is never written into the in-memory value. In particular, a `delete` that
//! races an in-flight `get` wins.
//!
//! ## Subscriptions
//!
//! [`ManagedBlob::subscribe`] registers a callback that receives a [`BlobSnapshot`] after
//! every local state change: fetch started, fetch finished, value saved, value cleared.
//! Callbacks run synchronously on the task that caused the change (the fetch task for fetch
//! results), never while internal locks are held. The returned [`Subscription`] unsubscribes
//! when dropped.
//!
//! ## Registries
//!
//! Blobs of one slot are handed out by a [`BlobRegistry`], which memoizes one [`ManagedBlob`]
//! per owner id so that all callers share state and subscriptions. Registries are created
//! explicitly at start-up; there is no global state.
//!
//! ### Metrics
//!
//! - `blob.fetch`: Fetches hitting the store, tagged with `status`.
//! - `blob.cache.hit`: `get`s served from memory.
//! - `blob.write`: Persisted writes after retries, tagged with `status` and `path`
//!   (`direct`, `debounced` or `flush`).
//! - `blob.write.duration`: Time spent persisting, including retries.
//! - `blob.write.retry`: Individual write attempts that are retried.
//! - `blob.debounce.scheduled` / `blob.debounce.coalesced`: Armed and replaced timers.
//! - `blob.delete`: Remote deletes, tagged with `status`.

mod blob_error;
mod blob_key;
mod managed;
mod registry;
mod retry;
mod subscribers;

pub use blob_error::{BlobError, BlobResult};
pub use blob_key::{BlobKey, OwnerId, Slot};
pub use managed::{BlobOptions, BlobSnapshot, BlobValue, ManagedBlob};
pub use registry::BlobRegistry;
pub use retry::{RetryPolicy, retry};
pub use subscribers::Subscription;
