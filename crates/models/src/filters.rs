use crate::{Collection, DeclarationError, ParentRef};
use std::fmt;
use std::sync::Arc;

type PredicateFn = dyn Fn(&str, &str) -> bool + Send + Sync;

/// A rule mapping a collection item's key into a subset of (or a single
/// item in) a parent collection. Filters appear among an item template's
/// parents and are resolved during per-key derivation; they never reach the
/// task graph directly.
#[derive(Clone)]
pub enum Filter {
    /// A predicate-selected sub-collection of the parent.
    Subset(CollectionFilter),
    /// The single parent item sharing the child's key.
    SameKey(SameKeyFilter),
}

impl Filter {
    /// The general filter: `predicate(child_key, parent_key)` selects which
    /// parent keys the child depends on.
    pub fn new<F>(parent: &Collection, predicate: F) -> Self
    where
        F: Fn(&str, &str) -> bool + Send + Sync + 'static,
    {
        Self::Subset(CollectionFilter {
            parent: parent.clone(),
            predicate: Arc::new(predicate),
        })
    }

    pub fn parent(&self) -> &Collection {
        match self {
            Self::Subset(filter) => &filter.parent,
            Self::SameKey(filter) => &filter.parent,
        }
    }

    /// Resolve this filter against a concrete child key.
    pub fn filter_by(&self, child_key: &str) -> Result<ParentRef, DeclarationError> {
        match self {
            Self::Subset(filter) => Ok(ParentRef::Collection(
                filter
                    .parent
                    .filtered(child_key, filter.predicate.clone()),
            )),
            Self::SameKey(filter) => Ok(ParentRef::Dataset(filter.parent.get(child_key)?)),
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Subset(filter) => write!(f, "Filter::Subset({})", filter.parent.catalog_path()),
            Self::SameKey(filter) => write!(f, "Filter::SameKey({})", filter.parent.catalog_path()),
        }
    }
}

#[derive(Clone)]
pub struct CollectionFilter {
    pub(crate) parent: Collection,
    pub(crate) predicate: Arc<PredicateFn>,
}

#[derive(Clone)]
pub struct SameKeyFilter {
    pub(crate) parent: Collection,
}

/// The same-key filter: the child item at key `k` depends on the parent
/// item at `k`.
pub fn same_key_in(parent: &Collection) -> Filter {
    Filter::SameKey(SameKeyFilter {
        parent: parent.clone(),
    })
}
