//! Managed remote blobs.
//!
//! This crate keeps JSON documents that live in a remote blob store (chat settings, memories,
//! story text and the like) in memory, deduplicates concurrent fetches, buffers and coalesces
//! writes, and notifies subscribers about every local change. See the [`caching`] module for
//! a walkthrough of how the pieces fit together.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod diagnostics;
pub mod logging;
pub mod store;

pub use caching::{
    BlobError, BlobKey, BlobOptions, BlobRegistry, BlobResult, BlobSnapshot, BlobValue,
    ManagedBlob, OwnerId, RetryPolicy, Slot, Subscription,
};
pub use diagnostics::{ErrorReporter, TracingReporter};
pub use store::{BlobStore, FilesystemBlobStore, HttpBlobStore};
