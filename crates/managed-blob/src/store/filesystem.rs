//! Support to store blobs in a local directory.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use futures::FutureExt;
use futures::future::BoxFuture;
use tempfile::NamedTempFile;

use crate::caching::{BlobError, BlobKey, BlobResult};

use super::BlobStore;

/// A [`BlobStore`] backed by a directory, mostly useful for local development and tests.
///
/// Blobs are stored as `{root}/{owner}/{slot}.json`.
#[derive(Debug, Clone)]
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Returns the path of the file holding the given blob.
    pub fn blob_path(&self, key: &BlobKey) -> BlobResult<PathBuf> {
        let owner = safe_path_segment(key.owner.as_str())?;
        let slot = safe_path_segment(key.slot.as_str())?;
        Ok(self.root.join(owner).join(format!("{slot}.json")))
    }
}

/// Makes sure the given key part cannot escape its directory.
fn safe_path_segment(segment: &str) -> BlobResult<&str> {
    let is_safe = !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\', '\0']);

    match is_safe {
        true => Ok(segment),
        false => Err(BlobError::InvalidKey(format!(
            "`{segment}` is not a valid path segment"
        ))),
    }
}

/// Atomically replaces the file at `path` with the given contents.
fn persist_contents(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::Other, "no parent directory to persist blob")
    })?;
    std::fs::create_dir_all(parent)?;

    let mut temp_file = NamedTempFile::new_in(parent)?;
    temp_file.write_all(contents)?;
    temp_file.as_file().sync_data()?;
    temp_file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

impl BlobStore for FilesystemBlobStore {
    fn read<'a>(&'a self, key: &'a BlobKey) -> BoxFuture<'a, BlobResult<String>> {
        async move {
            let path = self.blob_path(key)?;
            tracing::trace!("Reading blob at path {}", path.display());
            match tokio::fs::read_to_string(&path).await {
                Ok(contents) => Ok(contents),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Err(BlobError::NotFound),
                Err(err) => Err(err.into()),
            }
        }
        .boxed()
    }

    fn write<'a>(&'a self, key: &'a BlobKey, contents: String) -> BoxFuture<'a, BlobResult<()>> {
        async move {
            let path = self.blob_path(key)?;
            tracing::trace!("Writing blob at path {}", path.display());
            tokio::task::spawn_blocking(move || persist_contents(&path, contents.as_bytes()))
                .await
                .map_err(BlobError::from_std_error)??;
            Ok(())
        }
        .boxed()
    }

    fn remove<'a>(&'a self, key: &'a BlobKey) -> BoxFuture<'a, BlobResult<()>> {
        async move {
            let path = self.blob_path(key)?;
            tracing::trace!("Removing blob at path {}", path.display());
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            }
        }
        .boxed()
    }
}
