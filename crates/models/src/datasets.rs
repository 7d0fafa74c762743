use crate::names::{normalize_relative_path, CatalogPath, Name, Namespace};
use crate::{AccessError, Context, DeclarationError, Filter};
use codecs::{Codec, Kwargs, Value};
use std::fmt;
use std::sync::Arc;
use vfs::FileSystem as _;

/// A parent reference of a dataset: another dataset, a whole collection
/// (delivered as a key → value mapping), or a filter selecting part of a
/// collection by the child's key.
#[derive(Clone)]
pub enum ParentRef {
    Dataset(crate::Dataset),
    Collection(crate::Collection),
    Filter(Filter),
}

impl From<crate::Dataset> for ParentRef {
    fn from(dataset: crate::Dataset) -> Self {
        Self::Dataset(dataset)
    }
}

impl From<&crate::Dataset> for ParentRef {
    fn from(dataset: &crate::Dataset) -> Self {
        Self::Dataset(dataset.clone())
    }
}

impl From<crate::Collection> for ParentRef {
    fn from(collection: crate::Collection) -> Self {
        Self::Collection(collection)
    }
}

impl From<&crate::Collection> for ParentRef {
    fn from(collection: &crate::Collection) -> Self {
        Self::Collection(collection.clone())
    }
}

impl From<Filter> for ParentRef {
    fn from(filter: Filter) -> Self {
        Self::Filter(filter)
    }
}

impl fmt::Debug for ParentRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Dataset(d) => write!(f, "Dataset({})", d.catalog_path()),
            Self::Collection(c) => write!(f, "Collection({})", c.catalog_path()),
            Self::Filter(filter) => write!(f, "Filter({})", filter.parent().catalog_path()),
        }
    }
}

type CreateFn = dyn Fn(&BoundDataset, &[Value]) -> anyhow::Result<Value> + Send + Sync;

/// A pure creation function paired with its declared arity. Argument `i`
/// receives the materialized value of `parents[i]`; the first parameter is
/// the dataset being created, bound to the run context, through which item
/// functions reach their key and user context keys.
#[derive(Clone)]
pub struct Create {
    arity: usize,
    f: Arc<CreateFn>,
}

impl Create {
    /// A creation function of explicit arity, receiving its arguments as a
    /// slice. The scheduler always passes exactly `arity` values.
    pub fn from_fn<F>(arity: usize, f: F) -> Self
    where
        F: Fn(&BoundDataset, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self { arity, f: Arc::new(f) }
    }

    pub fn new0<F>(f: F) -> Self
    where
        F: Fn(&BoundDataset) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::from_fn(0, move |this, _args| f(this))
    }

    pub fn new1<F>(f: F) -> Self
    where
        F: Fn(&BoundDataset, &Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::from_fn(1, move |this, args| f(this, &args[0]))
    }

    pub fn new2<F>(f: F) -> Self
    where
        F: Fn(&BoundDataset, &Value, &Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::from_fn(2, move |this, args| f(this, &args[0], &args[1]))
    }

    pub fn new3<F>(f: F) -> Self
    where
        F: Fn(&BoundDataset, &Value, &Value, &Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::from_fn(3, move |this, args| f(this, &args[0], &args[1], &args[2]))
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn invoke(&self, this: &BoundDataset, args: &[Value]) -> anyhow::Result<Value> {
        debug_assert_eq!(args.len(), self.arity);
        (self.f)(this, args)
    }
}

impl fmt::Debug for Create {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Create").field("arity", &self.arity).finish()
    }
}

/// Storage attributes of a file-backed dataset.
pub(crate) struct StoreSpec {
    pub relative_path: String,
    pub extension: String,
    pub is_binary: bool,
    pub read_kwargs: Kwargs,
    pub write_kwargs: Kwargs,
    pub codec: Arc<dyn Codec>,
}

pub(crate) struct DatasetInner {
    pub path: CatalogPath,
    pub namespace: Namespace,
    pub name: String,
    pub description: Option<String>,
    /// The derivation key, for datasets derived from a collection.
    pub key: Option<String>,
    pub parents: Vec<ParentRef>,
    pub create: Option<Create>,
    pub store: StoreSpec,
}

/// An immutable dataset declaration: a single materializable value, its
/// parents, its creation function, and its storage attributes.
///
/// Datasets are cheap to clone and compare equal on catalog path alone.
#[derive(Clone)]
pub struct Dataset(pub(crate) Arc<DatasetInner>);

impl Dataset {
    /// Begin declaring a dataset under `namespace` with the given name.
    pub fn declare(namespace: impl Into<String>, name: impl Into<String>) -> DatasetBuilder {
        DatasetBuilder {
            namespace: namespace.into(),
            name: name.into(),
            description: None,
            parents: Vec::new(),
            create: None,
            relative_path: None,
            extension: "json".to_string(),
            is_binary: false,
            read_kwargs: Kwargs::new(),
            write_kwargs: Kwargs::new(),
            codec: None,
        }
    }

    pub fn catalog_path(&self) -> &CatalogPath {
        &self.0.path
    }

    pub fn namespace(&self) -> &Namespace {
        &self.0.namespace
    }

    /// Artifact name, including the `:key` suffix of derived items.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn description(&self) -> Option<&str> {
        self.0.description.as_deref()
    }

    /// The key this dataset was derived at, if it is a collection item.
    pub fn key(&self) -> Option<&str> {
        self.0.key.as_deref()
    }

    pub fn parents(&self) -> &[ParentRef] {
        &self.0.parents
    }

    pub fn create(&self) -> Option<&Create> {
        self.0.create.as_ref()
    }

    /// Is this a source: a dataset with no parents, whose staleness reduces
    /// to "does the file exist"?
    pub fn is_source(&self) -> bool {
        self.0.parents.is_empty()
    }

    pub fn relative_path(&self) -> &str {
        &self.0.store.relative_path
    }

    pub fn extension(&self) -> &str {
        &self.0.store.extension
    }

    pub fn is_binary(&self) -> bool {
        self.0.store.is_binary
    }

    pub fn read_kwargs(&self) -> &Kwargs {
        &self.0.store.read_kwargs
    }

    pub fn write_kwargs(&self) -> &Kwargs {
        &self.0.store.write_kwargs
    }

    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.0.store.codec
    }

    /// Bind this declaration to a run context.
    pub fn bind(&self, context: &Context) -> BoundDataset {
        BoundDataset {
            dataset: self.clone(),
            context: context.clone(),
        }
    }
}

impl PartialEq for Dataset {
    fn eq(&self, other: &Self) -> bool {
        self.0.path == other.0.path
    }
}

impl Eq for Dataset {}

impl std::hash::Hash for Dataset {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.path.hash(state);
    }
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("catalog_path", &self.0.path.as_str())
            .field("relative_path", &self.0.store.relative_path)
            .field("parents", &self.0.parents)
            .finish()
    }
}

pub struct DatasetBuilder {
    namespace: String,
    name: String,
    description: Option<String>,
    parents: Vec<ParentRef>,
    create: Option<Create>,
    relative_path: Option<String>,
    extension: String,
    is_binary: bool,
    read_kwargs: Kwargs,
    write_kwargs: Kwargs,
    codec: Option<Arc<dyn Codec>>,
}

impl DatasetBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
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

    /// Override the storage-relative path. When absent, the path is derived
    /// from the declaring namespace and name; it is never inherited.
    pub fn relative_path(mut self, path: impl Into<String>) -> Self {
        self.relative_path = Some(path.into());
        self
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

    /// Override the codec resolved from the file extension.
    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn build(self) -> Result<Dataset, DeclarationError> {
        let namespace = Namespace::new(self.namespace)?;
        let name = Name::new(self.name)?;
        let path = CatalogPath::root(&namespace, &name);

        validate_parents_and_create(&path, &self.parents, self.create.as_ref())?;
        let codec = resolve_codec(&path, &self.extension, self.codec)?;

        // The relative path is derived here, at declaration time, and is
        // deliberately not inherited from any other declaration.
        let relative_path = match self.relative_path {
            Some(path) => normalize_relative_path(&path),
            None => default_relative_path(&namespace, name.as_str(), Some(&self.extension)),
        };

        Ok(Dataset(Arc::new(DatasetInner {
            path,
            namespace,
            name: name.as_str().to_string(),
            description: self.description,
            key: None,
            parents: self.parents,
            create: self.create,
            store: StoreSpec {
                relative_path,
                extension: self.extension,
                is_binary: self.is_binary,
                read_kwargs: self.read_kwargs,
                write_kwargs: self.write_kwargs,
                codec,
            },
        })))
    }
}

pub(crate) fn validate_parents_and_create(
    path: &CatalogPath,
    parents: &[ParentRef],
    create: Option<&Create>,
) -> Result<(), DeclarationError> {
    let arity = match create {
        Some(create) => create.arity(),
        None if parents.is_empty() => return Ok(()),
        None => return Err(DeclarationError::MissingCreate { path: path.clone() }),
    };
    if arity != parents.len() {
        return Err(DeclarationError::ArityMismatch {
            path: path.clone(),
            arity,
            parents: parents.len(),
        });
    }
    Ok(())
}

pub(crate) fn resolve_codec(
    path: &CatalogPath,
    extension: &str,
    explicit: Option<Arc<dyn Codec>>,
) -> Result<Arc<dyn Codec>, DeclarationError> {
    if let Some(codec) = explicit {
        return Ok(codec);
    }
    codecs::for_extension(extension).ok_or_else(|| DeclarationError::UnknownExtension {
        path: path.clone(),
        extension: extension.to_string(),
    })
}

pub(crate) fn default_relative_path(
    namespace: &Namespace,
    name: &str,
    extension: Option<&str>,
) -> String {
    let dir = namespace.storage_dir();
    let file = match extension {
        Some(extension) => format!("{name}.{extension}"),
        None => name.to_string(),
    };
    if dir.is_empty() {
        file
    } else {
        format!("{dir}/{file}")
    }
}

/// A dataset bound to a run context, able to touch storage.
#[derive(Clone)]
pub struct BoundDataset {
    dataset: Dataset,
    context: Context,
}

impl BoundDataset {
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn catalog_path(&self) -> &CatalogPath {
        self.dataset.catalog_path()
    }

    /// The key this dataset was derived at, if it is a collection item.
    pub fn key(&self) -> Option<&str> {
        self.dataset.key()
    }

    /// Read and decode the stored value of this dataset.
    pub async fn read(&self) -> Result<Value, AccessError> {
        let data = self
            .context
            .file_system()
            .read(self.dataset.relative_path())
            .await?;
        let mut reader = data.as_ref();
        Ok(self
            .dataset
            .codec()
            .read(&mut reader, self.dataset.read_kwargs())?)
    }

    /// Encode and write `value` as the stored artifact of this dataset.
    pub async fn write(&self, value: &Value) -> Result<(), AccessError> {
        let mut buffer = Vec::new();
        self.dataset
            .codec()
            .write(value, &mut buffer, self.dataset.write_kwargs())?;
        Ok(self
            .context
            .file_system()
            .write(self.dataset.relative_path(), buffer.into())
            .await?)
    }

    pub async fn exists(&self) -> Result<bool, AccessError> {
        Ok(self
            .context
            .file_system()
            .exists(self.dataset.relative_path())
            .await?)
    }

    /// Last update time of the stored artifact; the backend's sentinel
    /// minimum if it doesn't exist yet.
    pub async fn last_update_time(&self) -> Result<vfs::Timestamp, AccessError> {
        Ok(self
            .context
            .file_system()
            .last_update_time(self.dataset.relative_path())
            .await?)
    }

    pub fn full_path(&self) -> String {
        self.context
            .file_system()
            .full_path(self.dataset.relative_path())
    }

    pub fn uri(&self) -> String {
        self.context.file_system().uri(self.dataset.relative_path())
    }
}

impl PartialEq for BoundDataset {
    fn eq(&self, other: &Self) -> bool {
        self.dataset == other.dataset
    }
}

impl Eq for BoundDataset {}

impl PartialEq<Dataset> for BoundDataset {
    fn eq(&self, other: &Dataset) -> bool {
        &self.dataset == other
    }
}

impl PartialEq<BoundDataset> for Dataset {
    fn eq(&self, other: &BoundDataset) -> bool {
        self == &other.dataset
    }
}

impl std::hash::Hash for BoundDataset {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.dataset.hash(state);
    }
}

impl fmt::Debug for BoundDataset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BoundDataset")
            .field("catalog_path", &self.dataset.catalog_path().as_str())
            .finish()
    }
}
