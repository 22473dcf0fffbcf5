//! Cross-backend predicate equivalence and schema-version migration.
//!
//! The contract under test: the same logical query over the same stored data
//! returns the same row set regardless of which engine evaluates it.

use anymodel::prelude::*;
use anymodel_file::FileBackend;
use anymodel_memory::MemoryBackend;
use asupersync::runtime::RuntimeBuilder;

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

fn record(pairs: &[(&str, Value)]) -> Record {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

fn dataset_schema() -> TableSchema {
    TableSchema::builder("entries", 1)
        .field(FieldDef::new("name", FieldType::String).required())
        .field(FieldDef::new("rank", FieldType::Int))
        .field(FieldDef::new("active", FieldType::Boolean))
        .build()
        .unwrap()
}

/// The shared dataset exercising null, false, and absent values.
async fn seed<B: Backend>(cx: &Cx, model: &Model<B>) {
    unwrap_outcome(model.init(cx).await);
    let rows = [
        record(&[("name", "arg_a".into()), ("rank", Value::Int(1)), ("active", true.into())]),
        record(&[("name", "arg_b".into()), ("rank", Value::Int(2)), ("active", false.into())]),
        record(&[("name", "arg_c".into()), ("rank", Value::Int(3)), ("active", Value::Null)]),
        record(&[("name", "arg_d".into()), ("rank", Value::Null)]),
        record(&[("name", "arg_e".into()), ("rank", Value::Int(5)), ("active", true.into())]),
    ];
    for row in rows {
        unwrap_outcome(model.insert(cx, row).await);
    }
}

fn filters() -> Vec<(&'static str, Filter)> {
    vec![
        ("all", Filter::all()),
        ("eq", Filter::by("name", "arg_b")),
        ("null", Filter::by("rank", Value::Null)),
        ("false coalesces null/absent", Filter::by("active", false)),
        (
            "membership",
            Filter::by("name", Value::Array(vec!["arg_a".into(), "arg_d".into()])),
        ),
        (
            "range",
            Where::new().compare("rank", Comparator::Gte, 2).into(),
        ),
        (
            "nested or",
            Where::new()
                .compare("active", Comparator::Eq, true)
                .or(|w| {
                    w.compare("rank", Comparator::Lt, 2)
                        .compare("rank", Comparator::Gt, 4)
                })
                .into(),
        ),
        ("ne false", Where::new().compare("active", Comparator::Ne, false).into()),
        ("empty or matches nothing", Where::new().or(|w| w).into()),
    ]
}

#[test]
fn memory_and_file_backends_return_identical_row_sets() {
    let rt = RuntimeBuilder::current_thread().build().expect("runtime");
    let cx = Cx::for_testing();
    let dir = tempfile::tempdir().expect("tempdir");
    rt.block_on(async {
        let memory = Model::new(dataset_schema(), MemoryBackend::new());
        let file = Model::new(dataset_schema(), FileBackend::new(dir.path()));
        seed(&cx, &memory).await;
        seed(&cx, &file).await;

        let options = SearchOptions::new().order_by("id", Direction::Asc);
        for (label, filter) in filters() {
            let from_memory = unwrap_outcome(memory.search(&cx, filter.clone(), &options).await);
            let from_file = unwrap_outcome(file.search(&cx, filter.clone(), &options).await);
            assert_eq!(from_memory, from_file, "filter {label:?} diverged");

            let memory_count = unwrap_outcome(memory.count(&cx, filter.clone()).await);
            let file_count = unwrap_outcome(file.count(&cx, filter).await);
            assert_eq!(memory_count, file_count, "count for {label:?} diverged");
            assert_eq!(memory_count as usize, from_memory.len());
        }
    });
}

#[test]
fn windowing_is_identical_across_backends() {
    let rt = RuntimeBuilder::current_thread().build().expect("runtime");
    let cx = Cx::for_testing();
    let dir = tempfile::tempdir().expect("tempdir");
    rt.block_on(async {
        let memory = Model::new(dataset_schema(), MemoryBackend::new());
        let file = Model::new(dataset_schema(), FileBackend::new(dir.path()));
        seed(&cx, &memory).await;
        seed(&cx, &file).await;

        let options = SearchOptions::new()
            .order_by("name", Direction::Desc)
            .limit(2)
            .offset(1);
        let from_memory =
            unwrap_outcome(memory.search(&cx, Filter::all(), &options).await);
        let from_file = unwrap_outcome(file.search(&cx, Filter::all(), &options).await);
        assert_eq!(from_memory, from_file);
        assert_eq!(from_memory.len(), 2);
        assert_eq!(
            from_memory[0].get("name"),
            Some(&Value::Text("arg_d".into()))
        );
    });
}

#[test]
fn version_upgrade_preserves_old_rows_and_reads_new_fields_as_null() {
    let rt = RuntimeBuilder::current_thread().build().expect("runtime");
    let cx = Cx::for_testing();
    let dir = tempfile::tempdir().expect("tempdir");
    rt.block_on(async {
        let backend = FileBackend::new(dir.path());

        let v1 = Model::new(dataset_schema(), backend.clone());
        seed(&cx, &v1).await;
        // Re-init on an unchanged schema is a no-op.
        unwrap_outcome(v1.init(&cx).await);
        assert_eq!(backend.stored_version("entries").unwrap(), Some(1));

        let v2_schema = TableSchema::builder("entries", 2)
            .field(FieldDef::new("name", FieldType::String).required())
            .field(FieldDef::new("rank", FieldType::Int))
            .field(FieldDef::new("active", FieldType::Boolean))
            .field(FieldDef::new("notes", FieldType::String))
            .field(FieldDef::new("meta", FieldType::Json))
            .build()
            .unwrap();
        let v2 = Model::new(v2_schema, backend.clone());
        unwrap_outcome(v2.init(&cx).await);
        assert_eq!(backend.stored_version("entries").unwrap(), Some(2));

        let rows = unwrap_outcome(
            v2.search(
                &cx,
                Filter::all(),
                &SearchOptions::new().order_by("id", Direction::Asc),
            )
            .await,
        );
        assert_eq!(rows.len(), 5);
        for row in &rows {
            assert_eq!(row.get("notes"), Some(&Value::Null));
            assert_eq!(row.get("meta"), Some(&Value::Null));
        }
        // Old data is untouched.
        assert_eq!(rows[0].get("name"), Some(&Value::Text("arg_a".into())));
        assert_eq!(rows[0].get("rank"), Some(&Value::Int(1)));

        // New fields become settable after the upgrade.
        unwrap_outcome(
            v2.update(&cx, 1, record(&[("notes", "updated".into())]))
                .await,
        );
        let row = unwrap_outcome(v2.get(&cx, 1).await).expect("row exists");
        assert_eq!(row.get("notes"), Some(&Value::Text("updated".into())));
    });
}
