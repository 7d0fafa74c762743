use models::{Artifact, Collection, Context, Dataset, Registry, Value};

mod graph;
mod scheduler;

/// Errors of graph resolution and task execution. Resolution errors abort a
/// run before any task starts; task errors name the failing node and its
/// parents, and leave completed artifacts in place for the next run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("dependency cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
    #[error("{path}: a collection filter can only appear among a collection item's parents")]
    UnresolvedFilter { path: String },
    #[error("target '{path}' is not registered in the catalog slice")]
    UnknownTarget { path: String },
    #[error("failed to enumerate keys of collection '{collection}'")]
    Keys {
        collection: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Declaration(#[from] models::DeclarationError),
    #[error("failed to build '{path}' (parents: [{}])", .parents.join(", "))]
    Task {
        path: String,
        parents: Vec<String>,
        #[source]
        source: anyhow::Error,
    },
}

/// A build target: a declared artifact handle, or a catalog path resolved
/// against the registry slice during graph resolution.
#[derive(Clone, Debug)]
pub enum Target {
    Artifact(Artifact),
    Path(String),
}

impl From<Artifact> for Target {
    fn from(artifact: Artifact) -> Self {
        Self::Artifact(artifact)
    }
}

impl From<Dataset> for Target {
    fn from(dataset: Dataset) -> Self {
        Self::Artifact(Artifact::Dataset(dataset))
    }
}

impl From<&Dataset> for Target {
    fn from(dataset: &Dataset) -> Self {
        Self::Artifact(Artifact::Dataset(dataset.clone()))
    }
}

impl From<Collection> for Target {
    fn from(collection: Collection) -> Self {
        Self::Artifact(Artifact::Collection(collection))
    }
}

impl From<&Collection> for Target {
    fn from(collection: &Collection) -> Self {
        Self::Artifact(Artifact::Collection(collection.clone()))
    }
}

impl From<&str> for Target {
    fn from(path: &str) -> Self {
        Self::Path(path.to_string())
    }
}

impl From<String> for Target {
    fn from(path: String) -> Self {
        Self::Path(path)
    }
}

/// The result of a completed run.
#[derive(Debug)]
pub struct Outcome {
    /// The targets' values, in target order. Present only for runs with
    /// in-memory transfer enabled.
    pub values: Option<Vec<Value>>,
    /// Count of artifacts created or rebuilt.
    pub built: usize,
    /// Count of artifacts adopted as-is from storage.
    pub reused: usize,
}

/// Scheduler expands a registry slice into a concrete task graph and
/// executes it incrementally: a dataset is rebuilt only when its stored
/// artifact is missing or older than the newest of its transitive inputs.
#[derive(Debug, Clone)]
pub struct Scheduler {
    workers: usize,
    in_memory_transfer: bool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let workers = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(4);
        Self {
            workers,
            in_memory_transfer: false,
        }
    }

    /// Cap on concurrently executing tasks.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Hand freshly computed values directly to downstream tasks, and
    /// return the targets' values from `build`. Artifacts are still written
    /// to storage; only re-reads are skipped.
    pub fn in_memory_transfer(mut self, enabled: bool) -> Self {
        self.in_memory_transfer = enabled;
        self
    }

    /// Run `targets` (default: every artifact of `slice`) to completion
    /// under `context`, rebuilding exactly what is stale. Path targets are
    /// looked up in `slice`; an unregistered path fails the resolution.
    pub async fn build(
        &self,
        slice: &Registry,
        targets: Option<Vec<Target>>,
        context: &Context,
    ) -> Result<Outcome, Error> {
        let graph = graph::resolve(slice, targets, context).await?;
        scheduler::execute(&graph, context, self.workers, self.in_memory_transfer).await
    }
}
