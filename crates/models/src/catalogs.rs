use crate::{CatalogPath, Collection, Dataset};
use std::collections::BTreeMap;

/// A declared artifact: a dataset or a collection.
#[derive(Clone, Debug)]
pub enum Artifact {
    Dataset(Dataset),
    Collection(Collection),
}

impl Artifact {
    pub fn catalog_path(&self) -> &CatalogPath {
        match self {
            Self::Dataset(dataset) => dataset.catalog_path(),
            Self::Collection(collection) => collection.catalog_path(),
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Self::Dataset(dataset) => dataset.description(),
            Self::Collection(collection) => collection.description(),
        }
    }
}

impl From<Dataset> for Artifact {
    fn from(dataset: Dataset) -> Self {
        Self::Dataset(dataset)
    }
}

impl From<&Dataset> for Artifact {
    fn from(dataset: &Dataset) -> Self {
        Self::Dataset(dataset.clone())
    }
}

impl From<Collection> for Artifact {
    fn from(collection: Collection) -> Self {
        Self::Collection(collection)
    }
}

impl From<&Collection> for Artifact {
    fn from(collection: &Collection) -> Self {
        Self::Collection(collection.clone())
    }
}

impl PartialEq for Artifact {
    fn eq(&self, other: &Self) -> bool {
        self.catalog_path() == other.catalog_path()
    }
}

impl Eq for Artifact {}

/// Registry is the slice of declared artifacts a run builds against.
/// Registering a second artifact under an existing catalog path replaces
/// the previous entry.
#[derive(Default, Clone)]
pub struct Registry {
    entries: BTreeMap<CatalogPath, Artifact>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, artifact: impl Into<Artifact>) -> &mut Self {
        let artifact = artifact.into();
        self.entries
            .insert(artifact.catalog_path().clone(), artifact);
        self
    }

    pub fn get(&self, path: &str) -> Option<&Artifact> {
        self.entries.get(path)
    }

    /// The dataset registered at `path`, if any.
    pub fn dataset(&self, path: &str) -> Option<&Dataset> {
        match self.entries.get(path) {
            Some(Artifact::Dataset(dataset)) => Some(dataset),
            _ => None,
        }
    }

    /// The collection registered at `path`, if any.
    pub fn collection(&self, path: &str) -> Option<&Collection> {
        match self.entries.get(path) {
            Some(Artifact::Collection(collection)) => Some(collection),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Catalog introspection: every registered catalog path, mapped to its
    /// description.
    pub fn describe(&self) -> BTreeMap<String, Option<String>> {
        self.entries
            .iter()
            .map(|(path, artifact)| {
                (
                    path.as_str().to_string(),
                    artifact.description().map(str::to_string),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{ItemTemplate, Keys};
    use pretty_assertions::assert_eq;

    fn fixture() -> (Registry, Dataset, Collection) {
        let dataset = Dataset::declare("catalog.raw", "Quotes")
            .description("Raw quotes.")
            .build()
            .unwrap();
        let collection = Collection::declare("catalog.raw", "Regions")
            .keys(Keys::fixed(["ams", "fra"]))
            .item(ItemTemplate::new())
            .build()
            .unwrap();

        let mut registry = Registry::new();
        registry.add(&dataset).add(&collection);
        (registry, dataset, collection)
    }

    #[test]
    fn looks_up_artifacts_by_path_and_type() {
        let (registry, dataset, collection) = fixture();

        assert_eq!(registry.len(), 2);
        assert!(registry.get("catalog.raw.Quotes").is_some());
        assert!(registry.get("catalog.raw.Missing").is_none());

        assert_eq!(registry.dataset("catalog.raw.Quotes"), Some(&dataset));
        assert_eq!(registry.collection("catalog.raw.Regions"), Some(&collection));

        // Typed lookups miss when the path names the other kind.
        assert_eq!(registry.dataset("catalog.raw.Regions"), None);
        assert_eq!(registry.collection("catalog.raw.Quotes"), None);
    }

    #[test]
    fn re_registration_replaces_the_entry() {
        let (mut registry, _dataset, _collection) = fixture();

        let replacement = Dataset::declare("catalog.raw", "Quotes")
            .description("Adjusted quotes.")
            .build()
            .unwrap();
        registry.add(&replacement);

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.describe()["catalog.raw.Quotes"],
            Some("Adjusted quotes.".to_string())
        );
    }
}
