use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;

mod local;
mod object;

pub use local::LocalFileSystem;
pub use object::ObjectFileSystem;

/// Timestamp of a stored artifact. Values are only ever compared against
/// other timestamps produced by the same backend.
pub type Timestamp = DateTime<Utc>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("'{0}' does not exist")]
    NotFound(String),
    #[error("invalid storage path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },
    #[error("cannot serve catalog URI '{0}'")]
    UnsupportedUri(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    ObjectStore(#[from] object_store::Error),
}

/// FileSystem is the uniform storage contract of the catalog.
///
/// Paths are virtual: `/`-separated strings resolved under the backend's
/// root. Write operations create any intermediate directories, and reads of
/// missing paths fail with Error::NotFound.
#[async_trait::async_trait]
pub trait FileSystem: Send + Sync {
    /// Does `path` exist under the root?
    async fn exists(&self, path: &str) -> Result<bool, Error>;
    /// Read the complete contents of `path`.
    async fn read(&self, path: &str) -> Result<bytes::Bytes, Error>;
    /// Write `data` to `path`, replacing any prior content.
    async fn write(&self, path: &str, data: bytes::Bytes) -> Result<(), Error>;
    /// Recursively create the directory `path`. Idempotent.
    async fn mkdir(&self, path: &str) -> Result<(), Error>;
    /// Last-modified time of `path`, or the backend's sentinel minimum
    /// timestamp if `path` doesn't exist.
    async fn last_update_time(&self, path: &str) -> Result<Timestamp, Error>;
    /// Immediate child names of the directory `path`.
    async fn listdir(&self, path: &str, include_hidden: bool) -> Result<BTreeSet<String>, Error>;
    /// Backend-native rendering of `path` under the root.
    fn full_path(&self, path: &str) -> String;
    /// Fully-qualified URI of `path` under the root.
    fn uri(&self, path: &str) -> String;
}

/// Map a catalog URI to its storage backend:
/// `s3://bucket/prefix` is served by the object store, while `file:///path`
/// is served by the local file system. `kwargs` is an opaque bag of
/// backend-specific settings taken from the run context.
pub fn from_uri(
    uri: &url::Url,
    kwargs: &serde_json::Map<String, serde_json::Value>,
) -> Result<Arc<dyn FileSystem>, Error> {
    match uri.scheme() {
        "s3" => Ok(Arc::new(ObjectFileSystem::from_uri(uri, kwargs)?)),
        "file" => {
            let root = uri
                .to_file_path()
                .map_err(|()| Error::UnsupportedUri(uri.to_string()))?;
            Ok(Arc::new(LocalFileSystem::new(root)))
        }
        _ => Err(Error::UnsupportedUri(uri.to_string())),
    }
}

// Split a virtual path into its non-empty components, rejecting any
// attempt to escape the root.
fn split_path(path: &str) -> Result<Vec<&str>, Error> {
    let mut parts = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                return Err(Error::InvalidPath {
                    path: path.to_string(),
                    reason: "may not traverse above the root",
                })
            }
            part => parts.push(part),
        }
    }
    Ok(parts)
}
