use anyhow::Context as _;
use build::{Error, Scheduler, Target};
use models::{
    same_key_in, Collection, Context, Create, Dataset, Filter, ItemTemplate, Keys,
    Registry, Value,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

// A "frame" is an array of rows, each a column → number object.

fn one_row(column: &str, value: i64) -> Value {
    let mut row = serde_json::Map::new();
    row.insert(column.to_string(), value.into());
    Value::Array(vec![Value::Object(row)])
}

fn scale(frame: &Value, factor: i64) -> Value {
    match frame {
        Value::Number(n) => json!(n.as_i64().unwrap() * factor),
        Value::Array(rows) => Value::Array(rows.iter().map(|row| scale(row, factor)).collect()),
        Value::Object(row) => Value::Object(
            row.iter()
                .map(|(column, value)| (column.clone(), scale(value, factor)))
                .collect(),
        ),
        other => other.clone(),
    }
}

// Horizontal concatenation of the frames of a key → frame mapping.
fn hconcat(mapping: &Value) -> Value {
    let mut out = serde_json::Map::new();
    for frame in mapping.as_object().expect("a gathered mapping").values() {
        for row in frame.as_array().expect("a frame") {
            for (column, value) in row.as_object().expect("a row") {
                out.insert(column.clone(), value.clone());
            }
        }
    }
    Value::Array(vec![Value::Object(out)])
}

fn columns(frame: &Value) -> Vec<String> {
    frame.as_array().expect("a frame")[0]
        .as_object()
        .expect("a row")
        .keys()
        .cloned()
        .collect()
}

struct Catalog {
    quotes: Collection,
    doubled: Collection,
    grouped: Collection,
    empty: Collection,
    all_quotes: Dataset,
    empty_summary: Dataset,
    registry: Registry,
}

// Quotes has keys {a1, a2, b1, b2}, each item a single-cell frame keyed by
// its own key. Doubled derives per-key; Grouped aggregates the 'a' and 'b'
// halves; AllQuotes consumes the whole collection; EmptySummary consumes an
// empty one.
fn catalog() -> Catalog {
    let quotes = Collection::declare("catalog.sample", "Quotes")
        .description("One single-cell frame per market slice.")
        .keys(Keys::fixed(["a1", "a2", "b1", "b2"]))
        .item(ItemTemplate::new().create(Create::new0(|this| {
            let key = this.key().context("quote items carry a key")?;
            Ok(one_row(key, 1))
        })))
        .build()
        .unwrap();

    let doubled = Collection::declare("catalog.sample", "Doubled")
        .keys(Keys::fixed(["a1", "a2", "b1", "b2"]))
        .item(
            ItemTemplate::new()
                .parent(same_key_in(&quotes))
                .create(Create::new1(|_this, frame| Ok(scale(frame, 2)))),
        )
        .build()
        .unwrap();

    let grouped = Collection::declare("catalog.sample", "Grouped")
        .keys(Keys::fixed(["a", "b"]))
        .item(
            ItemTemplate::new()
                .parent(Filter::new(&quotes, |child, parent| {
                    parent.starts_with(child)
                }))
                .create(Create::new1(|_this, mapping| Ok(hconcat(mapping)))),
        )
        .build()
        .unwrap();

    let empty = Collection::declare("catalog.sample", "Idle")
        .keys(Keys::fixed(Vec::<String>::new()))
        .item(ItemTemplate::new().create(Create::new0(|_this| Ok(json!([])))))
        .build()
        .unwrap();

    let all_quotes = Dataset::declare("catalog.sample", "AllQuotes")
        .parent(&quotes)
        .create(Create::new1(|_this, mapping| Ok(hconcat(mapping))))
        .build()
        .unwrap();

    let empty_summary = Dataset::declare("catalog.sample", "IdleSummary")
        .parent(&empty)
        .create(Create::new1(|_this, mapping| {
            if mapping.as_object().map_or(false, |m| m.is_empty()) {
                Ok(json!([]))
            } else {
                Ok(hconcat(mapping))
            }
        }))
        .build()
        .unwrap();

    let mut registry = Registry::new();
    registry
        .add(&quotes)
        .add(&doubled)
        .add(&grouped)
        .add(&empty)
        .add(&all_quotes)
        .add(&empty_summary);

    Catalog {
        quotes,
        doubled,
        grouped,
        empty,
        all_quotes,
        empty_summary,
        registry,
    }
}

fn scratch_context() -> (tempfile::TempDir, Context) {
    let dir = tempfile::tempdir().unwrap();
    let context = Context::new(dir.path().to_string_lossy()).unwrap();
    (dir, context)
}

// Last update times of every dataset in the catalog, keyed by name.
async fn update_times(catalog: &Catalog, context: &Context) -> BTreeMap<String, vfs::Timestamp> {
    let mut out = BTreeMap::new();
    for collection in [
        &catalog.quotes,
        &catalog.doubled,
        &catalog.grouped,
        &catalog.empty,
    ] {
        let bound = collection.bind(context);
        for key in bound.keys().await.unwrap() {
            let item = bound.get(&key).unwrap();
            out.insert(
                item.dataset().name().to_string(),
                item.last_update_time().await.unwrap(),
            );
        }
    }
    for dataset in [&catalog.all_quotes, &catalog.empty_summary] {
        let bound = dataset.bind(context);
        out.insert(
            dataset.name().to_string(),
            bound.last_update_time().await.unwrap(),
        );
    }
    out
}

#[tokio::test]
async fn resolves_dependencies_across_the_catalog() {
    let catalog = catalog();
    let (_dir, context) = scratch_context();

    let outcome = Scheduler::new()
        .build(&catalog.registry, None, &context)
        .await
        .unwrap();
    assert_eq!(outcome.built, 12);
    assert_eq!(outcome.reused, 0);

    assert!(catalog
        .quotes
        .get("b1")
        .unwrap()
        .bind(&context)
        .exists()
        .await
        .unwrap());

    // Per-key derivation doubled each single-cell frame.
    let doubled = catalog
        .doubled
        .get("a1")
        .unwrap()
        .bind(&context)
        .read()
        .await
        .unwrap();
    assert_eq!(doubled, one_row("a1", 2));

    // Aggregation of the filtered 'b' half.
    let grouped = catalog
        .grouped
        .get("b")
        .unwrap()
        .bind(&context)
        .read()
        .await
        .unwrap();
    assert_eq!(columns(&grouped), vec!["b1", "b2"]);
}

#[tokio::test]
async fn simplifies_the_graph_towards_targets() {
    let catalog = catalog();
    let (_dir, context) = scratch_context();

    Scheduler::new()
        .build(
            &catalog.registry,
            Some(vec![Target::from(&catalog.all_quotes)]),
            &context,
        )
        .await
        .unwrap();

    assert!(catalog
        .all_quotes
        .bind(&context)
        .exists()
        .await
        .unwrap());

    // Nothing unreachable from the target was materialized.
    assert!(!catalog.empty_summary.bind(&context).exists().await.unwrap());
    assert!(!catalog
        .doubled
        .get("a1")
        .unwrap()
        .bind(&context)
        .exists()
        .await
        .unwrap());
}

#[tokio::test]
async fn running_twice_writes_nothing() {
    let catalog = catalog();
    let (_dir, context) = scratch_context();
    let scheduler = Scheduler::new();

    scheduler
        .build(&catalog.registry, None, &context)
        .await
        .unwrap();
    let before = update_times(&catalog, &context).await;

    let outcome = scheduler
        .build(&catalog.registry, None, &context)
        .await
        .unwrap();

    assert_eq!(outcome.built, 0);
    assert_eq!(outcome.reused, 12);
    assert_eq!(update_times(&catalog, &context).await, before);
}

#[tokio::test]
async fn rebuilds_exactly_the_stale_subgraph() {
    let catalog = catalog();
    let (_dir, context) = scratch_context();
    let scheduler = Scheduler::new();

    scheduler
        .build(&catalog.registry, None, &context)
        .await
        .unwrap();
    let before = update_times(&catalog, &context).await;

    // Remove one member of Quotes and re-run.
    tokio::time::sleep(Duration::from_millis(25)).await;
    let victim = catalog.quotes.get("a1").unwrap().bind(&context);
    tokio::fs::remove_file(victim.full_path()).await.unwrap();

    let outcome = scheduler
        .build(&catalog.registry, None, &context)
        .await
        .unwrap();
    assert_eq!(outcome.built, 4);

    // Exactly the member and its transitive consumers were rewritten.
    let after = update_times(&catalog, &context).await;
    let changed = ["Quotes:a1", "Doubled:a1", "Grouped:a", "AllQuotes"];
    for (name, stamp) in &after {
        if changed.contains(&name.as_str()) {
            assert!(stamp > &before[name], "{name} should have been rebuilt");
        } else {
            assert_eq!(stamp, &before[name], "{name} should be untouched");
        }
    }
}

#[tokio::test]
async fn consumers_of_empty_collections_complete() {
    let catalog = catalog();
    let (_dir, context) = scratch_context();

    Scheduler::new()
        .build(
            &catalog.registry,
            Some(vec![Target::from(&catalog.empty_summary)]),
            &context,
        )
        .await
        .unwrap();

    let bound = catalog.empty_summary.bind(&context);
    assert!(bound.exists().await.unwrap());
    assert_eq!(bound.read().await.unwrap(), json!([]));
}

#[tokio::test]
async fn transfers_target_values_in_memory() {
    let catalog = catalog();
    let (_dir, context) = scratch_context();

    let outcome = Scheduler::new()
        .in_memory_transfer(true)
        .build(
            &catalog.registry,
            Some(vec![Target::from(catalog.quotes.get("a1").unwrap())]),
            &context,
        )
        .await
        .unwrap();

    assert_eq!(outcome.values, Some(vec![one_row("a1", 1)]));

    // A second in-memory run serves the same value from storage.
    let outcome = Scheduler::new()
        .in_memory_transfer(true)
        .build(
            &catalog.registry,
            Some(vec![Target::from(catalog.quotes.get("a1").unwrap())]),
            &context,
        )
        .await
        .unwrap();
    assert_eq!(outcome.built, 0);
    assert_eq!(outcome.values, Some(vec![one_row("a1", 1)]));
}

#[tokio::test]
async fn collection_targets_materialize_every_item() {
    let catalog = catalog();
    let (_dir, context) = scratch_context();

    let outcome = Scheduler::new()
        .in_memory_transfer(true)
        .build(
            &catalog.registry,
            Some(vec![Target::from(&catalog.quotes)]),
            &context,
        )
        .await
        .unwrap();

    let values = outcome.values.unwrap();
    let mapping = values[0].as_object().unwrap();
    assert_eq!(
        mapping.keys().collect::<Vec<_>>(),
        vec!["a1", "a2", "b1", "b2"]
    );
    assert_eq!(mapping["b2"], one_row("b2", 1));
}

// Chained sums over plain number-array frames:
// C = A + B, D = A + C, E = C + D.
struct Sums {
    raw_a: Dataset,
    base_c: Dataset,
    base_d: Dataset,
    feature_e: Dataset,
    registry: Registry,
}

fn sums() -> Sums {
    let add = |a: &Value, b: &Value| -> Value {
        let pairs = a
            .as_array()
            .expect("a frame")
            .iter()
            .zip(b.as_array().expect("a frame"));
        Value::Array(
            pairs
                .map(|(x, y)| json!(x.as_i64().unwrap() + y.as_i64().unwrap()))
                .collect(),
        )
    };

    let raw_a = Dataset::declare("catalog.sums", "RawA")
        .create(Create::new0(|_this| Ok(json!([1, 2]))))
        .build()
        .unwrap();
    let raw_b = Dataset::declare("catalog.sums", "RawB")
        .create(Create::new0(|_this| Ok(json!([4, 8]))))
        .build()
        .unwrap();
    let base_c = Dataset::declare("catalog.sums", "BaseC")
        .parents([&raw_a, &raw_b])
        .create(Create::new2(move |_this, a, b| Ok(add(a, b))))
        .build()
        .unwrap();
    let base_d = Dataset::declare("catalog.sums", "BaseD")
        .parents([&raw_a, &base_c])
        .create(Create::new2(move |_this, a, c| Ok(add(a, c))))
        .build()
        .unwrap();
    let feature_e = Dataset::declare("catalog.sums", "FeatureE")
        .parents([&base_c, &base_d])
        .create(Create::new2(move |_this, c, d| Ok(add(c, d))))
        .build()
        .unwrap();

    let mut registry = Registry::new();
    registry
        .add(&raw_a)
        .add(&raw_b)
        .add(&base_c)
        .add(&base_d)
        .add(&feature_e);

    Sums {
        raw_a,
        base_c,
        base_d,
        feature_e,
        registry,
    }
}

#[tokio::test]
async fn chains_of_sums_build_and_update_incrementally() {
    let sums = sums();
    let (_dir, context) = scratch_context();
    let scheduler = Scheduler::new();

    scheduler
        .build(
            &sums.registry,
            Some(vec![Target::from(&sums.feature_e)]),
            &context,
        )
        .await
        .unwrap();

    assert!(sums.raw_a.bind(&context).exists().await.unwrap());
    assert_eq!(
        sums.base_c.bind(&context).read().await.unwrap(),
        json!([5, 10])
    );
    assert_eq!(
        sums.feature_e.bind(&context).read().await.unwrap(),
        json!([11, 22])
    );

    // Overwrite D with twice its value: C must be left alone, E updated.
    tokio::time::sleep(Duration::from_millis(25)).await;
    let d = sums.base_d.bind(&context);
    let doubled = scale(&d.read().await.unwrap(), 2);
    d.write(&doubled).await.unwrap();

    let time_c = sums.base_c.bind(&context).last_update_time().await.unwrap();

    let outcome = scheduler
        .build(
            &sums.registry,
            Some(vec![Target::from(&sums.feature_e)]),
            &context,
        )
        .await
        .unwrap();

    assert_eq!(outcome.built, 1);
    assert_eq!(
        sums.base_c.bind(&context).last_update_time().await.unwrap(),
        time_c
    );
    assert_eq!(
        sums.feature_e.bind(&context).read().await.unwrap(),
        json!([17, 34])
    );
}

#[tokio::test]
async fn targets_may_be_named_by_catalog_path() {
    let catalog = catalog();
    let (_dir, context) = scratch_context();

    Scheduler::new()
        .build(
            &catalog.registry,
            Some(vec![Target::from("catalog.sample.AllQuotes")]),
            &context,
        )
        .await
        .unwrap();

    assert!(catalog.all_quotes.bind(&context).exists().await.unwrap());
    assert!(!catalog.empty_summary.bind(&context).exists().await.unwrap());

    // A path absent from the slice fails resolution before any task runs.
    let err = Scheduler::new()
        .build(
            &catalog.registry,
            Some(vec![Target::from("catalog.sample.Nonexistent")]),
            &context,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::UnknownTarget { path } if path == "catalog.sample.Nonexistent"
    ));
}

#[tokio::test]
async fn failing_tasks_name_their_node_and_parents() {
    let (_dir, context) = scratch_context();

    let source = Dataset::declare("catalog.sample", "Good")
        .create(Create::new0(|_this| Ok(json!([1]))))
        .build()
        .unwrap();
    let broken = Dataset::declare("catalog.sample", "Broken")
        .parent(&source)
        .create(Create::new1(|_this, _a| anyhow::bail!("boom")))
        .build()
        .unwrap();

    let mut registry = Registry::new();
    registry.add(&source).add(&broken);

    let err = Scheduler::new()
        .build(&registry, None, &context)
        .await
        .unwrap_err();

    let Error::Task { path, parents, .. } = err else {
        panic!("expected a task error");
    };
    assert_eq!(path, "catalog.sample.Broken");
    assert_eq!(parents, vec!["catalog.sample.Good"]);

    // The successfully built parent is left in place for the next run.
    assert!(source.bind(&context).exists().await.unwrap());
}

#[tokio::test]
async fn missing_sources_without_create_fail_the_run() {
    let (_dir, context) = scratch_context();

    let source = Dataset::declare("catalog.sample", "HandFed").build().unwrap();
    let mut registry = Registry::new();
    registry.add(&source);

    let err = Scheduler::new()
        .build(&registry, None, &context)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Task { path, .. } if path == "catalog.sample.HandFed"));

    // Feeding the file by hand satisfies the next run.
    source.bind(&context).write(&json!([1])).await.unwrap();
    let outcome = Scheduler::new()
        .build(&registry, None, &context)
        .await
        .unwrap();
    assert_eq!((outcome.built, outcome.reused), (0, 1));
}

#[tokio::test]
async fn raw_filters_on_plain_datasets_are_rejected() {
    let catalog = catalog();
    let (_dir, context) = scratch_context();

    let invalid = Dataset::declare("catalog.sample", "Invalid")
        .parent(Filter::new(&catalog.quotes, |_child, _parent| true))
        .create(Create::new1(|_this, a| Ok(a.clone())))
        .build()
        .unwrap();

    let mut registry = Registry::new();
    registry.add(&invalid);

    let err = Scheduler::new()
        .build(&registry, None, &context)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnresolvedFilter { path } if path == "catalog.sample.Invalid"));
}

#[tokio::test]
async fn key_enumeration_failures_abort_before_any_task() {
    let (_dir, context) = scratch_context();

    let source = Dataset::declare("catalog.sample", "Good")
        .create(Create::new0(|_this| Ok(json!([1]))))
        .build()
        .unwrap();
    let flaky = Collection::declare("catalog.sample", "Flaky")
        .keys(Keys::from_fn(|_bound| anyhow::bail!("listing failed")))
        .item(ItemTemplate::new())
        .build()
        .unwrap();

    let mut registry = Registry::new();
    registry.add(&source).add(&flaky);

    let err = Scheduler::new()
        .build(&registry, None, &context)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Keys { collection, .. } if collection == "catalog.sample.Flaky"));

    // Resolution failed before any task executed.
    assert!(!source.bind(&context).exists().await.unwrap());
}
