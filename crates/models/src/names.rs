use crate::DeclarationError;
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;

// Type-safe wrappers over the strings which identify catalog artifacts.
// Equality and hashing of every artifact type in this crate reduce to
// equality of its CatalogPath.

// TOKEN is a run of Unicode letters and numbers with a restricted set of
// other allowed punctuation symbols.
const TOKEN: &str = r"[\p{Letter}\p{Number}\-_]+";

lazy_static! {
    static ref NAME_RE: Regex = Regex::new(&["^", TOKEN, "$"].concat()).unwrap();
    static ref NAMESPACE_RE: Regex =
        Regex::new(&["^", TOKEN, r"(\.", TOKEN, ")*$"].concat()).unwrap();
}

/// Name of a single artifact, unique within its namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name(String);

impl Name {
    pub fn new(name: impl Into<String>) -> Result<Self, DeclarationError> {
        let name = name.into();
        if !NAME_RE.is_match(&name) {
            return Err(DeclarationError::InvalidName(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Namespace is the dotted qualifier under which artifacts are declared,
/// such as `catalog.trading.prices`. Its first segment names the catalog
/// itself and doesn't participate in storage paths.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(namespace: impl Into<String>) -> Result<Self, DeclarationError> {
        let namespace = namespace.into();
        if !NAMESPACE_RE.is_match(&namespace) {
            return Err(DeclarationError::InvalidNamespace(namespace));
        }
        Ok(Self(namespace))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Storage directory of artifacts declared in this namespace:
    /// the namespace segments minus the leading one, joined by '/'.
    pub fn storage_dir(&self) -> String {
        self.0.split('.').skip(1).collect::<Vec<_>>().join("/")
    }
}

/// CatalogPath is the stable identity of an artifact:
/// `<namespace>.<Name>`, extended with `:<key>` for collection items and
/// an opaque `:filter<id>` suffix for filtered collections.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CatalogPath(String);

impl CatalogPath {
    pub(crate) fn root(namespace: &Namespace, name: &Name) -> Self {
        Self(format!("{}.{}", namespace.as_str(), name.as_str()))
    }

    /// Path of the item of a collection at `key`.
    pub(crate) fn item(&self, key: &str) -> Self {
        Self(format!("{}:{}", self.0, key))
    }

    /// Path of a filtered variant of a collection. `suffix` must be fresh
    /// for every filter application.
    pub(crate) fn filtered(&self, suffix: &str) -> Self {
        Self(format!("{}:filter{}", self.0, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::ops::Deref for CatalogPath {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CatalogPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for CatalogPath {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CatalogPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Item keys join catalog paths after ':' and storage paths after '/',
/// so they exclude the few characters which would be ambiguous there.
pub(crate) fn validate_key(key: &str) -> Result<(), DeclarationError> {
    if key.is_empty() || key.contains(['/', ':', '.']) {
        return Err(DeclarationError::InvalidKey(key.to_string()));
    }
    Ok(())
}

// Normalize a storage-relative path: '/'-join its non-empty segments.
pub(crate) fn normalize_relative_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}
