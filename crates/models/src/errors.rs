use crate::CatalogPath;

/// Errors raised while declaring artifacts. These surface before any run
/// begins; a catalog with an invalid declaration never builds.
#[derive(Debug, thiserror::Error)]
pub enum DeclarationError {
    #[error("'{0}' is not a valid artifact name")]
    InvalidName(String),
    #[error("'{0}' is not a valid catalog namespace")]
    InvalidNamespace(String),
    #[error("'{0}' is not a valid collection key")]
    InvalidKey(String),
    #[error(
        "{path}: the `create` function is incompatible with `parents`: \
         `create` has {arity} arguments while `parents` has length {parents}"
    )]
    ArityMismatch {
        path: CatalogPath,
        arity: usize,
        parents: usize,
    },
    #[error("{path}: `parents` is non-empty but no `create` function is declared")]
    MissingCreate { path: CatalogPath },
    #[error("{path}: the mandatory `{attribute}` attribute is missing")]
    MissingAttribute {
        path: CatalogPath,
        attribute: &'static str,
    },
    #[error("{path}: no codec is registered for file extension '{extension}'")]
    UnknownExtension {
        path: CatalogPath,
        extension: String,
    },
}

/// Errors raised while constructing a run context.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("'{0}' cannot be parsed as a catalog URI or an absolute path")]
    InvalidUri(String),
    #[error(transparent)]
    Storage(#[from] vfs::Error),
}

/// Errors raised by bound artifacts reading or writing storage.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error(transparent)]
    Storage(#[from] vfs::Error),
    #[error(transparent)]
    Codec(#[from] codecs::Error),
}
