mod catalogs;
mod collections;
mod context;
mod datasets;
mod errors;
mod filters;
mod names;

pub use catalogs::{Artifact, Registry};
pub use collections::{
    BoundCollection, Collection, CollectionBuilder, ItemSpec, ItemTemplate, Keys,
};
pub use context::{Context, ContextBuilder};
pub use datasets::{BoundDataset, Create, Dataset, DatasetBuilder, ParentRef};
pub use errors::{AccessError, ContextError, DeclarationError};
pub use filters::{same_key_in, CollectionFilter, Filter, SameKeyFilter};
pub use names::{CatalogPath, Name, Namespace};

// Payload and codec types, re-exported so declarations read from one crate.
pub use codecs::{Codec, Kwargs, Value};
