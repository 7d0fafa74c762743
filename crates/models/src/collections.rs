use crate::datasets::{
    default_relative_path, resolve_codec, validate_parents_and_create, DatasetInner, StoreSpec,
};
use crate::names::{validate_key, CatalogPath, Name, Namespace};
use crate::{Context, Create, Dataset, DeclarationError, ParentRef};
use codecs::{Codec, Kwargs, Value};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use vfs::FileSystem as _;

type KeysFn =
    dyn for<'a> Fn(&'a BoundCollection) -> BoxFuture<'a, anyhow::Result<Vec<String>>> + Send + Sync;

/// Keys enumerates the members of a collection. It is a function of exactly
/// one argument (the collection bound to a run context), so enumeration may
/// consult the storage backend.
#[derive(Clone)]
pub struct Keys {
    f: Arc<KeysFn>,
}

impl Keys {
    /// An enumerator returning its future directly.
    pub fn new<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a BoundCollection) -> BoxFuture<'a, anyhow::Result<Vec<String>>>
            + Send
            + Sync
            + 'static,
    {
        Self { f: Arc::new(f) }
    }

    /// A fixed, declaration-time list of keys.
    pub fn fixed<I>(keys: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        Self::new(move |_bound| {
            let keys = keys.clone();
            async move { Ok(keys) }.boxed()
        })
    }

    /// A synchronous enumerator over the bound collection.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&BoundCollection) -> anyhow::Result<Vec<String>> + Send + Sync + 'static,
    {
        Self::new(move |bound| {
            let out = f(bound);
            async move { out }.boxed()
        })
    }

    /// Enumerate keys from the file stems of a storage folder. Hidden
    /// entries are excluded, and names differing only by extension yield a
    /// single key.
    pub fn from_folder(path: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(move |bound| {
            let fs = bound.context().file_system().clone();
            let path = path.clone();
            async move {
                let names = fs.listdir(&path, false).await?;
                let stems: BTreeSet<String> = names
                    .iter()
                    .map(|name| match name.rsplit_once('.') {
                        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
                        _ => name.clone(),
                    })
                    .collect();
                Ok(stems.into_iter().collect())
            }
            .boxed()
        })
    }
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Keys(..)")
    }
}

/// The artifact template from which a collection derives its per-key
/// datasets: everything a dataset declares except a name and path, which
/// come from the collection and the key.
#[derive(Clone)]
pub struct ItemTemplate {
    extension: String,
    is_binary: bool,
    read_kwargs: Kwargs,
    write_kwargs: Kwargs,
    codec: Option<Arc<dyn Codec>>,
    parents: Vec<ParentRef>,
    create: Option<Create>,
}

impl ItemTemplate {
    pub fn new() -> Self {
        Self {
            extension: "json".to_string(),
            is_binary: false,
            read_kwargs: Kwargs::new(),
            write_kwargs: Kwargs::new(),
            codec: None,
            parents: Vec::new(),
            create: None,
        }
    }

    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn binary(mut self, is_binary: bool) -> Self {
        self.is_binary = is_binary;
        self
    }

    pub fn read_kwargs(mut self, kwargs: Kwargs) -> Self {
        self.read_kwargs = kwargs;
        self
    }

    pub fn write_kwargs(mut self, kwargs: Kwargs) -> Self {
        self.write_kwargs = kwargs;
        self
    }

    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn parent(mut self, parent: impl Into<ParentRef>) -> Self {
        self.parents.push(parent.into());
        self
    }

    pub fn parents<I>(mut self, parents: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<ParentRef>,
    {
        self.parents.extend(parents.into_iter().map(Into::into));
        self
    }

    pub fn create(mut self, create: Create) -> Self {
        self.create = Some(create);
        self
    }
}

impl Default for ItemTemplate {
    fn default() -> Self {
        Self::new()
    }
}

/// The validated item template held by a built collection.
#[derive(Clone)]
pub struct ItemSpec {
    pub(crate) extension: String,
    pub(crate) is_binary: bool,
    pub(crate) read_kwargs: Kwargs,
    pub(crate) write_kwargs: Kwargs,
    pub(crate) codec: Arc<dyn Codec>,
    pub(crate) parents: Vec<ParentRef>,
    pub(crate) create: Option<Create>,
}

impl ItemSpec {
    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn is_binary(&self) -> bool {
        self.is_binary
    }

    pub fn parents(&self) -> &[ParentRef] {
        &self.parents
    }

    pub fn create(&self) -> Option<&Create> {
        self.create.as_ref()
    }
}

pub(crate) struct CollectionInner {
    pub path: CatalogPath,
    pub namespace: Namespace,
    pub name: String,
    pub description: Option<String>,
    pub relative_path: String,
    pub keys: Keys,
    pub item: ItemSpec,
}

/// An immutable collection declaration: an indexed family of datasets, one
/// per key, each derived from the collection's item template.
///
/// Collections are cheap to clone and compare equal on catalog path alone.
#[derive(Clone)]
pub struct Collection(pub(crate) Arc<CollectionInner>);

impl Collection {
    /// Begin declaring a collection under `namespace` with the given name.
    pub fn declare(namespace: impl Into<String>, name: impl Into<String>) -> CollectionBuilder {
        CollectionBuilder {
            namespace: namespace.into(),
            name: name.into(),
            description: None,
            relative_path: None,
            keys: None,
            item: None,
        }
    }

    pub fn catalog_path(&self) -> &CatalogPath {
        &self.0.path
    }

    pub fn namespace(&self) -> &Namespace {
        &self.0.namespace
    }

    /// Collection name, including the `:filter` suffix of filtered variants.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn description(&self) -> Option<&str> {
        self.0.description.as_deref()
    }

    /// Storage folder holding this collection's items.
    pub fn relative_path(&self) -> &str {
        &self.0.relative_path
    }

    pub fn item(&self) -> &ItemSpec {
        &self.0.item
    }

    /// Derive the concrete dataset of this collection at `key`.
    ///
    /// The derived dataset lives at `<collection>:<key>` in the catalog and
    /// `<relative_path>/<key>.<extension>` in storage. Filters among the
    /// item's parents are resolved against `key`; other parents are used
    /// as-is.
    pub fn get(&self, key: &str) -> Result<Dataset, DeclarationError> {
        validate_key(key)?;
        let item = &self.0.item;

        let parents = item
            .parents
            .iter()
            .map(|parent| match parent {
                ParentRef::Dataset(_) | ParentRef::Collection(_) => Ok(parent.clone()),
                ParentRef::Filter(filter) => filter.filter_by(key),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Dataset(Arc::new(DatasetInner {
            path: self.0.path.item(key),
            namespace: self.0.namespace.clone(),
            name: format!("{}:{}", self.0.name, key),
            description: self.0.description.clone(),
            key: Some(key.to_string()),
            parents,
            create: item.create.clone(),
            store: StoreSpec {
                relative_path: format!("{}/{}.{}", self.0.relative_path, key, item.extension),
                extension: item.extension.clone(),
                is_binary: item.is_binary,
                read_kwargs: item.read_kwargs.clone(),
                write_kwargs: item.write_kwargs.clone(),
                codec: item.codec.clone(),
            },
        })))
    }

    /// Bind this declaration to a run context.
    pub fn bind(&self, context: &Context) -> BoundCollection {
        BoundCollection {
            collection: self.clone(),
            context: context.clone(),
        }
    }

    // A filtered variant of this collection: same item, namespace, storage
    // folder, and description, with keys restricted by `predicate` applied
    // to `child_key` and a fresh opaque path suffix.
    pub(crate) fn filtered(
        &self,
        child_key: &str,
        predicate: Arc<dyn Fn(&str, &str) -> bool + Send + Sync>,
    ) -> Collection {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let parent = self.clone();
        let child_key = child_key.to_string();

        let keys = Keys::new(move |bound| {
            let parent = parent.clone();
            let context = bound.context().clone();
            let predicate = predicate.clone();
            let child_key = child_key.clone();
            async move {
                let keys = parent.bind(&context).keys().await?;
                Ok(keys
                    .into_iter()
                    .filter(|key| predicate(&child_key, key))
                    .collect())
            }
            .boxed()
        });

        Collection(Arc::new(CollectionInner {
            path: self.0.path.filtered(&suffix),
            namespace: self.0.namespace.clone(),
            name: format!("{}:filter{}", self.0.name, suffix),
            description: self.0.description.clone(),
            relative_path: self.0.relative_path.clone(),
            keys,
            item: self.0.item.clone(),
        }))
    }
}

impl PartialEq for Collection {
    fn eq(&self, other: &Self) -> bool {
        self.0.path == other.0.path
    }
}

impl Eq for Collection {}

impl std::hash::Hash for Collection {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.path.hash(state);
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Collection")
            .field("catalog_path", &self.0.path.as_str())
            .field("relative_path", &self.0.relative_path)
            .finish()
    }
}

pub struct CollectionBuilder {
    namespace: String,
    name: String,
    description: Option<String>,
    relative_path: Option<String>,
    keys: Option<Keys>,
    item: Option<ItemTemplate>,
}

impl CollectionBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Override the storage folder. When absent, it is derived from the
    /// declaring namespace and name; it is never inherited.
    pub fn relative_path(mut self, path: impl Into<String>) -> Self {
        self.relative_path = Some(path.into());
        self
    }

    pub fn keys(mut self, keys: Keys) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn item(mut self, item: ItemTemplate) -> Self {
        self.item = Some(item);
        self
    }

    pub fn build(self) -> Result<Collection, DeclarationError> {
        let namespace = Namespace::new(self.namespace)?;
        let name = Name::new(self.name)?;
        let path = CatalogPath::root(&namespace, &name);

        let Some(keys) = self.keys else {
            return Err(DeclarationError::MissingAttribute {
                path,
                attribute: "keys",
            });
        };
        let Some(item) = self.item else {
            return Err(DeclarationError::MissingAttribute {
                path,
                attribute: "item",
            });
        };

        validate_parents_and_create(&path, &item.parents, item.create.as_ref())?;
        let codec = resolve_codec(&path, &item.extension, item.codec)?;

        let relative_path = match self.relative_path {
            Some(path) => crate::names::normalize_relative_path(&path),
            None => default_relative_path(&namespace, name.as_str(), None),
        };

        Ok(Collection(Arc::new(CollectionInner {
            path,
            namespace,
            name: name.as_str().to_string(),
            description: self.description,
            relative_path,
            keys,
            item: ItemSpec {
                extension: item.extension,
                is_binary: item.is_binary,
                read_kwargs: item.read_kwargs,
                write_kwargs: item.write_kwargs,
                codec,
                parents: item.parents,
                create: item.create,
            },
        })))
    }
}

/// A collection bound to a run context.
#[derive(Clone)]
pub struct BoundCollection {
    collection: Collection,
    context: Context,
}

impl BoundCollection {
    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn catalog_path(&self) -> &CatalogPath {
        self.collection.catalog_path()
    }

    /// Enumerate this collection's keys.
    pub async fn keys(&self) -> anyhow::Result<Vec<String>> {
        self.collection.0.keys.f.as_ref()(self).await
    }

    /// The bound item at `key`.
    pub fn get(&self, key: &str) -> Result<crate::BoundDataset, DeclarationError> {
        Ok(self.collection.get(key)?.bind(&self.context))
    }

    /// Read stored items as a key → value mapping: all of them, or just
    /// `keys` when given.
    pub async fn read(
        &self,
        keys: Option<&[String]>,
    ) -> anyhow::Result<serde_json::Map<String, Value>> {
        let keys = match keys {
            Some(keys) => keys.to_vec(),
            None => self.keys().await?,
        };
        let mut out = serde_json::Map::new();
        for key in keys {
            let value = self.get(&key)?.read().await?;
            out.insert(key, value);
        }
        Ok(out)
    }
}

impl PartialEq for BoundCollection {
    fn eq(&self, other: &Self) -> bool {
        self.collection == other.collection
    }
}

impl Eq for BoundCollection {}

impl PartialEq<Collection> for BoundCollection {
    fn eq(&self, other: &Collection) -> bool {
        &self.collection == other
    }
}

impl PartialEq<BoundCollection> for Collection {
    fn eq(&self, other: &BoundCollection) -> bool {
        self == &other.collection
    }
}

impl std::hash::Hash for BoundCollection {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.collection.hash(state);
    }
}

impl fmt::Debug for BoundCollection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BoundCollection")
            .field("catalog_path", &self.collection.catalog_path().as_str())
            .finish()
    }
}
