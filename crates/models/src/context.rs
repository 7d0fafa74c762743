use crate::ContextError;
use codecs::{Kwargs, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use vfs::FileSystem;

/// Context is the read-only configuration of one run, shared by every node.
///
/// It carries the root storage URI, an optional bag of file-system kwargs,
/// and arbitrary user keys which `create` functions may read. Contexts are
/// cheap to clone and immutable once built; the backing file system is
/// constructed once and shared by all bindings.
#[derive(Clone)]
pub struct Context(Arc<Inner>);

struct Inner {
    catalog_uri: url::Url,
    fs_kwargs: Kwargs,
    extra: BTreeMap<String, Value>,
    file_system: Arc<dyn FileSystem>,
}

impl Context {
    /// Begin building a context over the given catalog root:
    /// `s3://bucket/prefix`, `file:///path`, or a bare filesystem path.
    pub fn builder(catalog_uri: impl Into<String>) -> ContextBuilder {
        ContextBuilder {
            catalog_uri: catalog_uri.into(),
            fs_kwargs: Kwargs::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Shorthand for a context with no kwargs or user keys.
    pub fn new(catalog_uri: impl Into<String>) -> Result<Self, ContextError> {
        Self::builder(catalog_uri).build()
    }

    pub fn catalog_uri(&self) -> &url::Url {
        &self.0.catalog_uri
    }

    pub fn fs_kwargs(&self) -> &Kwargs {
        &self.0.fs_kwargs
    }

    /// Read a user-defined context key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.extra.get(key)
    }

    /// The storage backend serving this run.
    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.0.file_system
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("catalog_uri", &self.0.catalog_uri.as_str())
            .field("extra", &self.0.extra)
            .finish()
    }
}

pub struct ContextBuilder {
    catalog_uri: String,
    fs_kwargs: Kwargs,
    extra: BTreeMap<String, Value>,
}

impl ContextBuilder {
    /// Backend-specific settings forwarded to the file-system constructor.
    pub fn fs_kwargs(mut self, kwargs: Kwargs) -> Self {
        self.fs_kwargs = kwargs;
        self
    }

    /// Attach a user-defined key, preserved untouched for `create` functions.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<Context, ContextError> {
        let catalog_uri = parse_catalog_uri(&self.catalog_uri)?;
        let file_system = vfs::from_uri(&catalog_uri, &self.fs_kwargs)?;

        Ok(Context(Arc::new(Inner {
            catalog_uri,
            fs_kwargs: self.fs_kwargs,
            extra: self.extra,
            file_system,
        })))
    }
}

// Map a "catalog_uri" argument to a URL. Bare paths are assumed to be
// local directories and are mapped to file:// URLs.
fn parse_catalog_uri(uri: &str) -> Result<url::Url, ContextError> {
    if let Ok(url) = url::Url::parse(uri) {
        return Ok(url);
    }
    tracing::debug!(uri, "catalog URI is not a URL; assuming it's a filesystem path");

    let path = if std::path::Path::new(uri).is_absolute() {
        std::path::PathBuf::from(uri)
    } else {
        std::env::current_dir()
            .map_err(|_| ContextError::InvalidUri(uri.to_string()))?
            .join(uri)
    };
    url::Url::from_file_path(&path).map_err(|()| ContextError::InvalidUri(uri.to_string()))
}
