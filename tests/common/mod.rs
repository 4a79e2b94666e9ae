#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use output_mapping::{
    backend::Backend,
    config::OutputMappingSettings,
    schema::{ColumnDataType, DataTypeSpec, SchemaColumn},
    snapshot::{BucketInfo, TableInfo, TableSnapshot},
    storage_api::{
        StorageApi,
        memory::{InMemoryStorage, StoredBucket, StoredColumn, StoredTable},
    },
};
use tempfile::{TempDir, tempdir};

pub const BUCKET_ID: &str = "in.c-output-mapping-test";
pub const TABLE_ID: &str = "in.c-output-mapping-test.typed_table";

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

pub fn settings() -> OutputMappingSettings {
    OutputMappingSettings::default()
}

pub fn strict_settings() -> OutputMappingSettings {
    OutputMappingSettings {
        strict_attributes: true,
        ..OutputMappingSettings::default()
    }
}

/// Storage holding the three-column typed table:
/// `col1 VARCHAR(255) NOT NULL PK`, `col2 NUMBER NOT NULL`, `col3 NUMBER(123)`.
pub fn typed_storage(backend: Backend) -> InMemoryStorage {
    let storage = InMemoryStorage::new(backend);
    storage.insert_bucket(StoredBucket::new(BUCKET_ID, backend));
    storage.insert_table(
        StoredTable::new(
            BUCKET_ID,
            "typed_table",
            true,
            vec![
                StoredColumn::typed("col1", "VARCHAR", Some("255"), false, "STRING"),
                StoredColumn::typed("col2", "NUMBER", None, false, "NUMERIC"),
                StoredColumn::typed("col3", "NUMBER", Some("123"), true, "NUMERIC"),
            ],
        )
        .with_primary_key(&["col1"]),
    );
    storage
}

pub fn untyped_storage(columns: &[&str], primary_key: &[&str]) -> InMemoryStorage {
    let storage = InMemoryStorage::new(Backend::Snowflake);
    storage.insert_bucket(StoredBucket::new(BUCKET_ID, Backend::Snowflake));
    storage.insert_table(
        StoredTable::new(
            BUCKET_ID,
            "untyped_table",
            false,
            columns.iter().map(|c| StoredColumn::untyped(c)).collect(),
        )
        .with_primary_key(primary_key),
    );
    storage
}

/// Schema that matches [`typed_storage`] exactly.
pub fn typed_schema() -> Vec<SchemaColumn> {
    vec![
        SchemaColumn::new(
            "col1",
            ColumnDataType::new(DataTypeSpec::new("STRING"))
                .with_backend(Backend::Snowflake, DataTypeSpec::new("VARCHAR").with_length("255")),
        )
        .with_primary_key(true)
        .with_nullable(false),
        SchemaColumn::new(
            "col2",
            ColumnDataType::new(DataTypeSpec::new("NUMERIC"))
                .with_backend(Backend::Snowflake, DataTypeSpec::new("NUMBER")),
        )
        .with_nullable(false),
        SchemaColumn::new(
            "col3",
            ColumnDataType::new(DataTypeSpec::new("NUMERIC"))
                .with_backend(Backend::Snowflake, DataTypeSpec::new("NUMBER").with_length("123")),
        ),
    ]
}

pub fn string_column(name: &str) -> SchemaColumn {
    SchemaColumn::new(name, ColumnDataType::new(DataTypeSpec::new("STRING")))
}

pub fn base_column(name: &str, base_type: &str) -> SchemaColumn {
    SchemaColumn::new(name, ColumnDataType::new(DataTypeSpec::new(base_type)))
}

pub fn snapshot(storage: &InMemoryStorage, table_id: &str) -> TableSnapshot {
    TableSnapshot::from_json(&storage.get_table(table_id).expect("table")).expect("snapshot")
}

pub fn bucket_and_table(storage: &InMemoryStorage, table_id: &str) -> (BucketInfo, TableInfo) {
    let bucket_id = table_id.rsplit_once('.').map(|(bucket, _)| bucket).expect("bucket id");
    let bucket = BucketInfo::from_json(&storage.get_bucket(bucket_id).expect("bucket")).expect("bucket info");
    let table = TableInfo::from_json(&storage.get_table(table_id).expect("table")).expect("table info");
    (bucket, table)
}
