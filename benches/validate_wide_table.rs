use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use output_mapping::backend::Backend;
use output_mapping::config::OutputMappingSettings;
use output_mapping::schema::{ColumnDataType, DataTypeSpec, SchemaColumn};
use output_mapping::snapshot::TableSnapshot;
use output_mapping::storage_api::StorageApi;
use output_mapping::storage_api::memory::{InMemoryStorage, StoredBucket, StoredColumn, StoredTable};
use output_mapping::validator::TableStructureValidator;

const BUCKET_ID: &str = "in.c-bench";
const TABLE_ID: &str = "in.c-bench.wide";

fn wide_storage(columns: usize) -> InMemoryStorage {
    let storage = InMemoryStorage::new(Backend::Snowflake);
    storage.insert_bucket(StoredBucket::new(BUCKET_ID, Backend::Snowflake));
    let stored = (0..columns)
        .map(|i| {
            if i % 2 == 0 {
                StoredColumn::typed(&format!("Column {i}"), "VARCHAR", Some("255"), true, "STRING")
            } else {
                StoredColumn::typed(&format!("Column {i}"), "NUMBER", Some("38,0"), true, "NUMERIC")
            }
        })
        .collect();
    storage.insert_table(StoredTable::new(BUCKET_ID, "wide", true, stored).with_primary_key(&["Column 0"]));
    storage
}

/// Matching schema plus `extra` new columns, with every tenth column's
/// length changed so the attribute path is exercised too.
fn wide_schema(columns: usize, extra: usize) -> Vec<SchemaColumn> {
    (0..columns + extra)
        .map(|i| {
            let (base, native, length) = if i % 2 == 0 {
                ("STRING", "VARCHAR", if i % 10 == 0 { "512" } else { "255" })
            } else {
                ("NUMERIC", "NUMBER", "38,0")
            };
            SchemaColumn::new(
                format!("column_{i}"),
                ColumnDataType::new(DataTypeSpec::new(base))
                    .with_backend(Backend::Snowflake, DataTypeSpec::new(native).with_length(length)),
            )
            .with_primary_key(i == 0)
        })
        .collect()
}

fn bench_validate_wide_table(c: &mut Criterion) {
    let storage = wide_storage(1_000);
    let settings = OutputMappingSettings::default();
    let snapshot =
        TableSnapshot::from_json(&storage.get_table(TABLE_ID).expect("table")).expect("snapshot");
    let schema = wide_schema(1_000, 50);

    let mut group = c.benchmark_group("validate_wide_table");

    group.bench_function("snapshot_1000_columns", |b| {
        let validator = TableStructureValidator::new(&storage, &settings);
        b.iter(|| {
            validator
                .validate(&schema, &snapshot)
                .expect("validate snapshot");
        });
    });

    group.bench_function("fetch_and_validate_1000_columns", |b| {
        let validator = TableStructureValidator::new(&storage, &settings);
        b.iter_batched(
            || schema.clone(),
            |schema| {
                validator
                    .validate_table(TABLE_ID, &schema)
                    .expect("validate table");
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_validate_wide_table);
criterion_main!(benches);
