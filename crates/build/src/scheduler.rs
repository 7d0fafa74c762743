use crate::graph::{NodeId, NodeKind, TaskGraph};
use crate::{Error, Outcome};
use anyhow::Context as _;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use models::{Context, Dataset, Value};
use std::collections::{BTreeSet, VecDeque};
use vfs::{FileSystem as _, Timestamp};

// Stamp of a gather node with no contributors. MIN_UTC precedes every
// backend's sentinel, so a consumer of only empty collections is rebuilt
// exactly when its own artifact is missing.
const EMPTY_STAMP: Timestamp = DateTime::<Utc>::MIN_UTC;

/// How a task obtains one parent value: from the in-memory cache, by a
/// codec read of a dataset's artifact, or by assembling a collection
/// mapping from per-item plans.
enum InputPlan {
    Value(Value),
    Read(Dataset),
    Gather(Vec<(String, InputPlan)>),
}

fn plan_input(graph: &TaskGraph, values: &[Option<Value>], id: NodeId) -> InputPlan {
    if let Some(value) = &values[id] {
        return InputPlan::Value(value.clone());
    }
    match &graph.nodes[id].kind {
        NodeKind::Dataset(dataset) => InputPlan::Read(dataset.clone()),
        NodeKind::Gather { items, .. } => InputPlan::Gather(
            items
                .iter()
                .map(|(key, item)| (key.clone(), plan_input(graph, values, *item)))
                .collect(),
        ),
    }
}

fn materialize<'a>(plan: InputPlan, context: &'a Context) -> BoxFuture<'a, anyhow::Result<Value>> {
    async move {
        match plan {
            InputPlan::Value(value) => Ok(value),
            InputPlan::Read(dataset) => dataset
                .bind(context)
                .read()
                .await
                .with_context(|| format!("failed to read parent '{}'", dataset.catalog_path())),
            InputPlan::Gather(items) => {
                let mut out = serde_json::Map::new();
                for (key, item) in items {
                    out.insert(key, materialize(item, context).await?);
                }
                Ok(Value::Object(out))
            }
        }
    }
    .boxed()
}

struct TaskOutput {
    stamp: Timestamp,
    value: Option<Value>,
    wrote: bool,
}

// One dataset task: decide staleness, then either adopt the on-disk
// artifact or materialize inputs, run create, and write the result.
async fn run_dataset(
    dataset: Dataset,
    context: Context,
    newest: Option<Timestamp>,
    inputs: Vec<InputPlan>,
    keep_value: bool,
) -> anyhow::Result<TaskOutput> {
    let fs = context.file_system();
    let path = dataset.relative_path();

    let exists = fs.exists(path).await?;
    let own_stamp = fs.last_update_time(path).await?;

    let stale = match newest {
        None => !exists,
        Some(newest) => !exists || own_stamp < newest,
    };
    if !stale {
        tracing::debug!(path = %dataset.catalog_path(), "artifact is fresh");
        return Ok(TaskOutput {
            stamp: own_stamp,
            value: None,
            wrote: false,
        });
    }

    let Some(create) = dataset.create().cloned() else {
        // A source with no creation function: the stored artifact is the
        // only possible origin of its value.
        anyhow::bail!("source artifact is missing from storage and declares no create function");
    };

    let mut args = Vec::with_capacity(inputs.len());
    for input in inputs {
        args.push(materialize(input, &context).await?);
    }

    let bound = dataset.bind(&context);

    // User compute runs on a blocking worker thread.
    let value = {
        let this = bound.clone();
        tokio::task::spawn_blocking(move || create.invoke(&this, &args))
            .await
            .map_err(|err| anyhow::anyhow!("create function panicked: {err}"))?
            .context("create function failed")?
    };

    bound
        .write(&value)
        .await
        .context("failed to write created artifact")?;

    // Publish the authoritative post-write timestamp.
    let stamp = fs.last_update_time(path).await?;
    tracing::debug!(path = %dataset.catalog_path(), %stamp, "built artifact");

    Ok(TaskOutput {
        stamp,
        value: keep_value.then_some(value),
        wrote: true,
    })
}

/// Execute the task graph: a ready-queue over dependency counts, with at
/// most `workers` dataset tasks in flight. On the first failure the run
/// drains (in-flight tasks finish, nothing new starts) and the failing
/// node is reported.
pub(crate) async fn execute(
    graph: &TaskGraph,
    context: &Context,
    workers: usize,
    in_memory: bool,
) -> Result<Outcome, Error> {
    let n = graph.nodes.len();

    let mut pending = vec![0usize; n];
    let mut dependents: Vec<Vec<NodeId>> = vec![Vec::new(); n];
    for (id, node) in graph.nodes.iter().enumerate() {
        let unique: BTreeSet<NodeId> = node.deps.iter().copied().collect();
        pending[id] = unique.len();
        for dep in unique {
            dependents[dep].push(id);
        }
    }

    let mut ready: VecDeque<NodeId> = (0..n).filter(|&id| pending[id] == 0).collect();
    let mut stamps: Vec<Option<Timestamp>> = vec![None; n];
    let mut values: Vec<Option<Value>> = vec![None; n];
    let mut in_flight: FuturesUnordered<BoxFuture<'static, (NodeId, anyhow::Result<TaskOutput>)>> =
        FuturesUnordered::new();

    let mut failure: Option<Error> = None;
    let (mut built, mut reused) = (0usize, 0usize);

    loop {
        // Dispatch eligible nodes. Gather nodes complete instantly: their
        // stamp is the max of their contributors, and their mapping value
        // is assembled lazily by whichever consumer demands it.
        while failure.is_none() && in_flight.len() < workers {
            let Some(id) = ready.pop_front() else {
                break;
            };
            let node = &graph.nodes[id];

            let newest = node
                .deps
                .iter()
                .map(|dep| stamps[*dep].expect("dependencies have completed"))
                .max();

            match &node.kind {
                NodeKind::Gather { .. } => {
                    stamps[id] = Some(newest.unwrap_or(EMPTY_STAMP));
                    for &dependent in &dependents[id] {
                        pending[dependent] -= 1;
                        if pending[dependent] == 0 {
                            ready.push_back(dependent);
                        }
                    }
                }
                NodeKind::Dataset(dataset) => {
                    let inputs = node
                        .deps
                        .iter()
                        .map(|dep| plan_input(graph, &values, *dep))
                        .collect();
                    let task = run_dataset(
                        dataset.clone(),
                        context.clone(),
                        newest,
                        inputs,
                        in_memory,
                    );
                    in_flight.push(async move { (id, task.await) }.boxed());
                }
            }
        }

        let Some((id, result)) = in_flight.next().await else {
            break;
        };
        let node = &graph.nodes[id];

        match result {
            Ok(output) => {
                stamps[id] = Some(output.stamp);
                values[id] = output.value;
                if output.wrote {
                    built += 1;
                } else {
                    reused += 1;
                }
                for &dependent in &dependents[id] {
                    pending[dependent] -= 1;
                    if pending[dependent] == 0 {
                        ready.push_back(dependent);
                    }
                }
            }
            Err(source) => {
                let error = Error::Task {
                    path: node.path.as_str().to_string(),
                    parents: node
                        .deps
                        .iter()
                        .map(|dep| graph.nodes[*dep].path.as_str().to_string())
                        .collect(),
                    source,
                };
                if failure.is_none() {
                    failure = Some(error);
                } else {
                    tracing::error!(error = %error, "additional task failure while draining");
                }
            }
        }
    }

    if let Some(error) = failure {
        return Err(error);
    }
    tracing::info!(built, reused, "run complete");

    // In-memory transfer returns the targets' values: straight from the
    // cache for freshly computed nodes, else read back through the codec.
    let values = if in_memory {
        let mut out = Vec::with_capacity(graph.targets.len());
        for &target in &graph.targets {
            let value = materialize(plan_input(graph, &values, target), context)
                .await
                .map_err(|source| Error::Task {
                    path: graph.nodes[target].path.as_str().to_string(),
                    parents: Vec::new(),
                    source,
                })?;
            out.push(value);
        }
        Some(out)
    } else {
        None
    };

    Ok(Outcome {
        values,
        built,
        reused,
    })
}
