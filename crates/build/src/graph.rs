use crate::{Error, Target};
use futures::future::BoxFuture;
use futures::FutureExt;
use models::{Artifact, CatalogPath, Collection, Context, Dataset, ParentRef, Registry};
use std::collections::{BTreeSet, HashMap};

pub(crate) type NodeId = usize;

/// A node of the concrete task DAG: either a dataset task (decide staleness,
/// run create, write) or a gather task assembling a collection's key → value
/// mapping for its consumers.
pub(crate) enum NodeKind {
    Dataset(Dataset),
    Gather {
        /// Item keys paired with the node producing each item.
        items: Vec<(String, NodeId)>,
    },
}

pub(crate) struct Node {
    pub path: CatalogPath,
    pub kind: NodeKind,
    /// Ordered dependencies, aligned with a dataset's parents. May repeat.
    pub deps: Vec<NodeId>,
}

/// The task DAG expanded from a registry slice for a set of targets.
/// Nodes are deduplicated by catalog path, and `nodes[i].deps` only holds
/// ids smaller than `i`.
pub(crate) struct TaskGraph {
    pub nodes: Vec<Node>,
    pub targets: Vec<NodeId>,
}

/// Expand declarations into the task graph reachable from `targets`
/// (default: every artifact of the slice). Collections among the targets
/// materialize all of their items.
pub(crate) async fn resolve(
    slice: &Registry,
    targets: Option<Vec<Target>>,
    context: &Context,
) -> Result<TaskGraph, Error> {
    let targets: Vec<Artifact> = match targets {
        None => slice.iter().cloned().collect(),
        Some(targets) => targets
            .into_iter()
            .map(|target| match target {
                Target::Artifact(artifact) => Ok(artifact),
                Target::Path(path) => slice
                    .get(&path)
                    .cloned()
                    .ok_or(Error::UnknownTarget { path }),
            })
            .collect::<Result<_, _>>()?,
    };

    let mut builder = Builder {
        context,
        nodes: Vec::new(),
        index: HashMap::new(),
        in_progress: Vec::new(),
    };

    let mut target_ids = Vec::new();
    for artifact in &targets {
        let id = match artifact {
            Artifact::Dataset(dataset) => builder.visit_dataset(dataset.clone()).await?,
            Artifact::Collection(collection) => {
                builder.visit_collection(collection.clone()).await?
            }
        };
        target_ids.push(id);
    }

    tracing::debug!(
        nodes = builder.nodes.len(),
        targets = target_ids.len(),
        "resolved task graph"
    );
    Ok(TaskGraph {
        nodes: builder.nodes,
        targets: target_ids,
    })
}

struct Builder<'c> {
    context: &'c Context,
    nodes: Vec<Node>,
    index: HashMap<CatalogPath, NodeId>,
    // DFS stack of paths being expanded, for cycle reporting.
    in_progress: Vec<CatalogPath>,
}

impl Builder<'_> {
    fn enter(&mut self, path: &CatalogPath) -> Result<(), Error> {
        if let Some(at) = self.in_progress.iter().position(|p| p == path) {
            let mut cycle: Vec<String> = self.in_progress[at..]
                .iter()
                .map(|p| p.as_str().to_string())
                .collect();
            cycle.push(path.as_str().to_string());
            return Err(Error::Cycle(cycle));
        }
        self.in_progress.push(path.clone());
        Ok(())
    }

    fn insert(&mut self, path: CatalogPath, kind: NodeKind, deps: Vec<NodeId>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node { path: path.clone(), kind, deps });
        self.index.insert(path, id);
        id
    }

    fn visit_dataset(&mut self, dataset: Dataset) -> BoxFuture<'_, Result<NodeId, Error>> {
        async move {
            let path = dataset.catalog_path().clone();
            if let Some(&id) = self.index.get(&path) {
                return Ok(id);
            }
            self.enter(&path)?;

            let mut deps = Vec::with_capacity(dataset.parents().len());
            for parent in dataset.parents().to_vec() {
                match parent {
                    ParentRef::Dataset(parent) => {
                        deps.push(self.visit_dataset(parent).await?);
                    }
                    ParentRef::Collection(parent) => {
                        deps.push(self.visit_collection(parent).await?);
                    }
                    ParentRef::Filter(_) => {
                        // Filters are resolved by per-key derivation; a plain
                        // dataset has no key to resolve them against.
                        return Err(Error::UnresolvedFilter {
                            path: path.as_str().to_string(),
                        });
                    }
                }
            }

            self.in_progress.pop();
            Ok(self.insert(path, NodeKind::Dataset(dataset), deps))
        }
        .boxed()
    }

    // A collection node is a gather task over one node per item key.
    fn visit_collection(&mut self, collection: Collection) -> BoxFuture<'_, Result<NodeId, Error>> {
        async move {
            let path = collection.catalog_path().clone();
            if let Some(&id) = self.index.get(&path) {
                return Ok(id);
            }
            self.enter(&path)?;

            let keys = collection
                .bind(self.context)
                .keys()
                .await
                .map_err(|source| Error::Keys {
                    collection: path.as_str().to_string(),
                    source,
                })?;

            let mut seen = BTreeSet::new();
            let mut items = Vec::with_capacity(keys.len());
            for key in keys {
                if !seen.insert(key.clone()) {
                    continue;
                }
                let item = collection.get(&key)?;
                let id = self.visit_dataset(item).await?;
                items.push((key, id));
            }

            self.in_progress.pop();
            let deps = items.iter().map(|(_, id)| *id).collect();
            Ok(self.insert(path, NodeKind::Gather { items }, deps))
        }
        .boxed()
    }
}
