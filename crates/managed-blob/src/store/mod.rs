//! Access to the remote blob store.
//!
//! The cache only ever sees the raw JSON text of a blob. Transport, authentication and
//! encryption are the business of the [`BlobStore`] implementation.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::caching::{BlobKey, BlobResult};
use crate::config::StoreConfig;

mod filesystem;
mod http;

pub use filesystem::FilesystemBlobStore;
pub use http::HttpBlobStore;

/// The user agent sent with every request.
pub const USER_AGENT: &str = concat!("managed-blob/", env!("CARGO_PKG_VERSION"));

/// A remote store holding raw blob contents.
///
/// Implementations must report a missing blob as
/// [`BlobError::NotFound`](crate::BlobError::NotFound)
/// from [`read`](Self::read), which the cache treats as a valid "absent" value.
pub trait BlobStore: Send + Sync + fmt::Debug + 'static {
    /// Reads the raw contents of a blob.
    fn read<'a>(&'a self, key: &'a BlobKey) -> BoxFuture<'a, BlobResult<String>>;

    /// Creates or replaces a blob.
    fn write<'a>(&'a self, key: &'a BlobKey, contents: String) -> BoxFuture<'a, BlobResult<()>>;

    /// Removes a blob. Removing a blob that does not exist is not an error.
    fn remove<'a>(&'a self, key: &'a BlobKey) -> BoxFuture<'a, BlobResult<()>>;
}

/// Creates the store described by the configuration.
pub fn from_config(config: &StoreConfig) -> BlobResult<Arc<dyn BlobStore>> {
    let store: Arc<dyn BlobStore> = match config {
        StoreConfig::Http(cfg) => Arc::new(HttpBlobStore::new(cfg)?),
        StoreConfig::Filesystem(cfg) => Arc::new(FilesystemBlobStore::new(&cfg.path)),
    };
    Ok(store)
}
