//! In-process Storage API backed by a JSON state document.
//!
//! Enforces the structural rules the platform enforces remotely (duplicate
//! columns, primary key columns must exist, required columns cannot be added
//! without a default, BigQuery columns cannot become required) and records
//! every mutation so callers can inspect what was issued and in which order.

use std::{
    collections::BTreeMap,
    fs::File,
    io::BufReader,
    path::Path,
    sync::{Mutex, MutexGuard, PoisonError},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{
    ClientError, ClientResult, ColumnAttributeChanges, ColumnSpec, DeleteFilter, Metadata,
    StorageApi, TableDefinition,
};
use crate::{
    backend::Backend,
    datatype::{self, BaseType, ResolvedDefinition},
    identifier,
    snapshot::MetadataEntry,
};

/// Storage operations that can be made to fail on their next call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Operation {
    GetTable,
    GetBucket,
    CreateBucket,
    CreateTable,
    CreateTableDefinition,
    AddColumn,
    UpdateColumn,
    SetPrimaryKey,
    SetMetadata,
    DeleteRows,
}

/// A mutation issued against the storage, in issue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageCall {
    CreateBucket {
        bucket_id: String,
    },
    CreateTable {
        table_id: String,
        typed: bool,
    },
    AddColumn {
        table_id: String,
        column: String,
    },
    UpdateColumn {
        table_id: String,
        column: String,
        changes: ColumnAttributeChanges,
    },
    SetPrimaryKey {
        table_id: String,
        columns: Vec<String>,
    },
    SetMetadata {
        target: String,
        provider: String,
        metadata: Metadata,
    },
    DeleteRows {
        table_id: String,
        filter: DeleteFilter,
    },
}

impl StorageCall {
    /// Calls that change a table's column layout or primary key.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            StorageCall::AddColumn { .. }
                | StorageCall::UpdateColumn { .. }
                | StorageCall::SetPrimaryKey { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBucket {
    pub id: String,
    pub stage: String,
    pub name: String,
    pub backend: Backend,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<MetadataEntry>,
}

impl StoredBucket {
    pub fn new(id: &str, backend: Backend) -> Self {
        let (stage, name) = id.split_once('.').unwrap_or(("in", id));
        Self {
            id: id.to_string(),
            stage: stage.to_string(),
            name: name.to_string(),
            backend,
            metadata: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredColumn {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<ResolvedDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basetype: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl StoredColumn {
    pub fn untyped(name: &str) -> Self {
        Self {
            name: name.to_string(),
            definition: None,
            basetype: None,
            metadata: Metadata::new(),
        }
    }

    pub fn typed(
        name: &str,
        type_name: &str,
        length: Option<&str>,
        nullable: bool,
        basetype: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            definition: Some(ResolvedDefinition {
                type_name: type_name.to_string(),
                length: length.map(str::to_string),
                nullable,
                default: None,
            }),
            basetype: Some(basetype.to_string()),
            metadata: Metadata::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTable {
    pub id: String,
    pub name: String,
    pub bucket_id: String,
    pub is_typed: bool,
    pub columns: Vec<StoredColumn>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl StoredTable {
    pub fn new(bucket_id: &str, name: &str, is_typed: bool, columns: Vec<StoredColumn>) -> Self {
        Self {
            id: format!("{bucket_id}.{name}"),
            name: name.to_string(),
            bucket_id: bucket_id.to_string(),
            is_typed,
            columns,
            primary_key: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    fn position(&self, name: &str) -> Option<usize> {
        let wanted = identifier::normalize(name);
        self.columns
            .iter()
            .position(|column| identifier::normalize(&column.name) == wanted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageState {
    #[serde(default = "default_backend")]
    pub default_backend: Backend,
    #[serde(default)]
    pub buckets: Vec<StoredBucket>,
    #[serde(default)]
    pub tables: Vec<StoredTable>,
}

fn default_backend() -> Backend {
    Backend::Snowflake
}

impl Default for StorageState {
    fn default() -> Self {
        Self {
            default_backend: default_backend(),
            buckets: Vec::new(),
            tables: Vec::new(),
        }
    }
}

impl StorageState {
    fn bucket(&self, bucket_id: &str) -> Option<&StoredBucket> {
        self.buckets.iter().find(|bucket| bucket.id == bucket_id)
    }

    fn table(&self, table_id: &str) -> ClientResult<&StoredTable> {
        self.tables
            .iter()
            .find(|table| table.id == table_id)
            .ok_or_else(|| ClientError::not_found(format!("The table \"{table_id}\" was not found.")))
    }

    fn table_mut(&mut self, table_id: &str) -> ClientResult<&mut StoredTable> {
        self.tables
            .iter_mut()
            .find(|table| table.id == table_id)
            .ok_or_else(|| ClientError::not_found(format!("The table \"{table_id}\" was not found.")))
    }

    fn backend_of(&self, table: &StoredTable) -> Backend {
        self.bucket(&table.bucket_id)
            .map(|bucket| bucket.backend)
            .unwrap_or(self.default_backend)
    }

    fn table_json(&self, table: &StoredTable) -> Value {
        let backend = self.backend_of(table);
        let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        let mut value = json!({
            "id": table.id,
            "name": table.name,
            "isTyped": table.is_typed,
            "bucket": {"id": table.bucket_id, "backend": backend.as_str()},
            "columns": names,
            "primaryKey": table.primary_key,
        });
        if table.is_typed {
            let columns: Vec<Value> = table
                .columns
                .iter()
                .map(|column| {
                    let definition = column.definition.clone().unwrap_or_else(|| {
                        ResolvedDefinition {
                            type_name: datatype::native_for_base(backend, BaseType::String)
                                .to_string(),
                            length: None,
                            nullable: true,
                            default: None,
                        }
                    });
                    json!({
                        "name": column.name,
                        "definition": {
                            "type": definition.type_name,
                            "nullable": definition.nullable,
                            "length": definition.length,
                            "default": definition.default,
                        },
                        "basetype": column.basetype.clone().unwrap_or_else(|| {
                            datatype::canonicalize(&definition.type_name, backend).to_string()
                        }),
                        "canBeFiltered": true,
                    })
                })
                .collect();
            value["definition"] = json!({
                "primaryKeysNames": table.primary_key,
                "columns": columns,
            });
        }
        value
    }

    fn ensure_new_table(&self, bucket_id: &str, name: &str) -> ClientResult<()> {
        if self.bucket(bucket_id).is_none() {
            return Err(ClientError::not_found(format!(
                "The bucket \"{bucket_id}\" was not found."
            )));
        }
        let table_id = format!("{bucket_id}.{name}");
        if self.tables.iter().any(|table| table.id == table_id) {
            return Err(ClientError::bad_request(format!(
                "The table \"{name}\" already exists in the bucket \"{bucket_id}\"."
            )));
        }
        Ok(())
    }
}

fn ensure_unique_names<'a, I>(names: I) -> ClientResult<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = Vec::new();
    for name in names {
        let normalized = identifier::normalize(name);
        if seen.contains(&normalized) {
            return Err(ClientError::bad_request(format!(
                "Column \"{name}\" is defined more than once."
            )));
        }
        seen.push(normalized);
    }
    Ok(())
}

fn ensure_primary_key_in(primary_key: &[String], columns: &[&str]) -> ClientResult<()> {
    let normalized = identifier::normalize_all(columns.iter().copied());
    for key in primary_key {
        if !normalized.contains(&identifier::normalize(key)) {
            return Err(ClientError::bad_request(format!(
                "Primary key column \"{key}\" is not defined in table columns."
            )));
        }
    }
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct InMemoryStorage {
    state: Mutex<StorageState>,
    calls: Mutex<Vec<StorageCall>>,
    failures: Mutex<BTreeMap<Operation, ClientError>>,
}

impl InMemoryStorage {
    pub fn new(default_backend: Backend) -> Self {
        Self::from_state(StorageState {
            default_backend,
            ..StorageState::default()
        })
    }

    pub fn from_state(state: StorageState) -> Self {
        Self {
            state: Mutex::new(state),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening storage state {path:?}"))?;
        let reader = BufReader::new(file);
        let state: StorageState =
            serde_json::from_reader(reader).context("Parsing storage state JSON")?;
        Ok(Self::from_state(state))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("Creating storage state {path:?}"))?;
        serde_json::to_writer_pretty(file, &*lock(&self.state)).context("Writing storage state JSON")
    }

    pub fn state(&self) -> StorageState {
        lock(&self.state).clone()
    }

    pub fn insert_bucket(&self, bucket: StoredBucket) {
        lock(&self.state).buckets.push(bucket);
    }

    pub fn insert_table(&self, table: StoredTable) {
        lock(&self.state).tables.push(table);
    }

    pub fn stored_table(&self, table_id: &str) -> Option<StoredTable> {
        lock(&self.state).table(table_id).ok().cloned()
    }

    pub fn calls(&self) -> Vec<StorageCall> {
        lock(&self.calls).clone()
    }

    pub fn structural_calls(&self) -> Vec<StorageCall> {
        self.calls()
            .into_iter()
            .filter(StorageCall::is_structural)
            .collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Make the next call of `operation` fail with `error`.
    pub fn fail_next(&self, operation: Operation, error: ClientError) {
        lock(&self.failures).insert(operation, error);
    }

    fn injected(&self, operation: Operation) -> ClientResult<()> {
        match lock(&self.failures).remove(&operation) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn record(&self, call: StorageCall) {
        lock(&self.calls).push(call);
    }
}

impl StorageApi for InMemoryStorage {
    fn get_table(&self, table_id: &str) -> ClientResult<Value> {
        self.injected(Operation::GetTable)?;
        let state = lock(&self.state);
        let table = state.table(table_id)?;
        Ok(state.table_json(table))
    }

    fn get_bucket(&self, bucket_id: &str) -> ClientResult<Value> {
        self.injected(Operation::GetBucket)?;
        let state = lock(&self.state);
        let bucket = state.bucket(bucket_id).ok_or_else(|| {
            ClientError::not_found(format!("The bucket \"{bucket_id}\" was not found."))
        })?;
        serde_json::to_value(bucket)
            .map_err(|err| ClientError::new(format!("Cannot serialize bucket: {err}"), 500))
    }

    fn create_bucket(
        &self,
        stage: &str,
        name: &str,
        backend: Option<Backend>,
    ) -> ClientResult<Value> {
        self.injected(Operation::CreateBucket)?;
        let mut state = lock(&self.state);
        let bucket_id = format!("{stage}.c-{name}");
        if state.bucket(&bucket_id).is_some() {
            return Err(ClientError::bad_request(format!(
                "The bucket \"{bucket_id}\" already exists."
            )));
        }
        let bucket = StoredBucket {
            id: bucket_id.clone(),
            stage: stage.to_string(),
            name: format!("c-{name}"),
            backend: backend.unwrap_or(state.default_backend),
            metadata: Vec::new(),
        };
        let value = serde_json::to_value(&bucket)
            .map_err(|err| ClientError::new(format!("Cannot serialize bucket: {err}"), 500))?;
        state.buckets.push(bucket);
        drop(state);
        self.record(StorageCall::CreateBucket { bucket_id });
        Ok(value)
    }

    fn set_bucket_metadata(
        &self,
        bucket_id: &str,
        provider: &str,
        metadata: &Metadata,
    ) -> ClientResult<()> {
        self.injected(Operation::SetMetadata)?;
        let mut state = lock(&self.state);
        let bucket = state
            .buckets
            .iter_mut()
            .find(|bucket| bucket.id == bucket_id)
            .ok_or_else(|| {
                ClientError::not_found(format!("The bucket \"{bucket_id}\" was not found."))
            })?;
        for (key, value) in metadata {
            bucket.metadata.retain(|entry| entry.key != *key);
            bucket.metadata.push(MetadataEntry {
                key: key.clone(),
                value: value.clone(),
                provider: Some(provider.to_string()),
            });
        }
        drop(state);
        self.record(StorageCall::SetMetadata {
            target: bucket_id.to_string(),
            provider: provider.to_string(),
            metadata: metadata.clone(),
        });
        Ok(())
    }

    fn create_table_definition(
        &self,
        bucket_id: &str,
        definition: &TableDefinition,
    ) -> ClientResult<String> {
        self.injected(Operation::CreateTableDefinition)?;
        let mut state = lock(&self.state);
        state.ensure_new_table(bucket_id, &definition.name)?;
        if definition.columns.is_empty() {
            return Err(ClientError::bad_request(
                "At least one column must be defined.",
            ));
        }
        let names: Vec<&str> = definition.columns.iter().map(|c| c.name.as_str()).collect();
        ensure_unique_names(names.iter().copied())?;
        ensure_primary_key_in(&definition.primary_keys_names, &names)?;

        let backend = state
            .bucket(bucket_id)
            .map(|bucket| bucket.backend)
            .unwrap_or(state.default_backend);
        let columns = definition
            .columns
            .iter()
            .map(|column| StoredColumn {
                name: column.name.clone(),
                definition: Some(column.definition.clone()),
                basetype: Some(column.basetype.clone().unwrap_or_else(|| {
                    datatype::canonicalize(&column.definition.type_name, backend).to_string()
                })),
                metadata: Metadata::new(),
            })
            .collect();
        let mut table = StoredTable::new(bucket_id, &definition.name, true, columns);
        table.primary_key = definition.primary_keys_names.clone();
        let table_id = table.id.clone();
        state.tables.push(table);
        drop(state);
        self.record(StorageCall::CreateTable {
            table_id: table_id.clone(),
            typed: true,
        });
        Ok(table_id)
    }

    fn create_table(
        &self,
        bucket_id: &str,
        name: &str,
        columns: &[String],
        primary_key: &[String],
    ) -> ClientResult<String> {
        self.injected(Operation::CreateTable)?;
        let mut state = lock(&self.state);
        state.ensure_new_table(bucket_id, name)?;
        if columns.is_empty() {
            return Err(ClientError::bad_request(
                "At least one column must be defined.",
            ));
        }
        let names: Vec<&str> = columns.iter().map(String::as_str).collect();
        ensure_unique_names(names.iter().copied())?;
        ensure_primary_key_in(primary_key, &names)?;

        let mut table = StoredTable::new(
            bucket_id,
            name,
            false,
            columns.iter().map(|c| StoredColumn::untyped(c)).collect(),
        );
        table.primary_key = primary_key.to_vec();
        let table_id = table.id.clone();
        state.tables.push(table);
        drop(state);
        self.record(StorageCall::CreateTable {
            table_id: table_id.clone(),
            typed: false,
        });
        Ok(table_id)
    }

    fn set_table_metadata(
        &self,
        table_id: &str,
        provider: &str,
        metadata: &Metadata,
    ) -> ClientResult<()> {
        self.injected(Operation::SetMetadata)?;
        let mut state = lock(&self.state);
        let table = state.table_mut(table_id)?;
        table
            .metadata
            .extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        drop(state);
        self.record(StorageCall::SetMetadata {
            target: table_id.to_string(),
            provider: provider.to_string(),
            metadata: metadata.clone(),
        });
        Ok(())
    }

    fn add_table_column(&self, table_id: &str, name: &str, spec: &ColumnSpec) -> ClientResult<()> {
        self.injected(Operation::AddColumn)?;
        let mut state = lock(&self.state);
        let backend = state.backend_of(state.table(table_id)?);
        let table = state.table_mut(table_id)?;
        if table.position(name).is_some() {
            return Err(ClientError::bad_request(format!(
                "The column \"{name}\" already exists in the table \"{table_id}\"."
            )));
        }
        let column = match (table.is_typed, spec) {
            (false, ColumnSpec::Untyped) => StoredColumn::untyped(name),
            (false, ColumnSpec::Typed { .. }) => {
                return Err(ClientError::bad_request(format!(
                    "Cannot add a typed column \"{name}\" to the untyped table \"{table_id}\"."
                )));
            }
            (true, ColumnSpec::Untyped) => StoredColumn::typed(
                name,
                datatype::native_for_base(backend, BaseType::String),
                None,
                true,
                BaseType::String.as_str(),
            ),
            (true, ColumnSpec::Typed {
                definition,
                basetype,
            }) => {
                if !definition.nullable && definition.default.is_none() {
                    return Err(ClientError::bad_request(format!(
                        "Cannot add the required column \"{name}\" without a default value."
                    )));
                }
                StoredColumn {
                    name: name.to_string(),
                    definition: Some(definition.clone()),
                    basetype: Some(basetype.clone().unwrap_or_else(|| {
                        datatype::canonicalize(&definition.type_name, backend).to_string()
                    })),
                    metadata: Metadata::new(),
                }
            }
        };
        table.columns.push(column);
        drop(state);
        self.record(StorageCall::AddColumn {
            table_id: table_id.to_string(),
            column: name.to_string(),
        });
        Ok(())
    }

    fn update_table_column(
        &self,
        table_id: &str,
        name: &str,
        changes: &ColumnAttributeChanges,
    ) -> ClientResult<()> {
        self.injected(Operation::UpdateColumn)?;
        let mut state = lock(&self.state);
        let backend = state.backend_of(state.table(table_id)?);
        let table = state.table_mut(table_id)?;
        if !table.is_typed {
            return Err(ClientError::bad_request(format!(
                "Cannot change the definition of column \"{name}\" in the untyped table \"{table_id}\"."
            )));
        }
        let position = table.position(name).ok_or_else(|| {
            ClientError::not_found(format!(
                "The column \"{name}\" was not found in the table \"{table_id}\"."
            ))
        })?;
        let column = &mut table.columns[position];
        let Some(definition) = column.definition.as_mut() else {
            return Err(ClientError::bad_request(format!(
                "The column \"{name}\" has no definition."
            )));
        };
        if backend == Backend::Bigquery && changes.nullable == Some(false) && definition.nullable {
            return Err(ClientError::bad_request(
                "Invalid request: BigQuery column cannot be set as required.",
            ));
        }
        if let Some(length) = &changes.length {
            definition.length = Some(length.clone());
        }
        if let Some(nullable) = changes.nullable {
            definition.nullable = nullable;
        }
        if let Some(default) = &changes.default {
            definition.default = Some(default.clone());
        }
        drop(state);
        self.record(StorageCall::UpdateColumn {
            table_id: table_id.to_string(),
            column: name.to_string(),
            changes: changes.clone(),
        });
        Ok(())
    }

    fn set_table_primary_key(&self, table_id: &str, columns: &[String]) -> ClientResult<()> {
        self.injected(Operation::SetPrimaryKey)?;
        let mut state = lock(&self.state);
        let table = state.table_mut(table_id)?;
        for column in columns {
            if table.position(column).is_none() {
                return Err(ClientError::bad_request(format!(
                    "Primary key column \"{column}\" does not exist in the table \"{table_id}\"."
                )));
            }
        }
        table.primary_key = columns.to_vec();
        drop(state);
        self.record(StorageCall::SetPrimaryKey {
            table_id: table_id.to_string(),
            columns: columns.to_vec(),
        });
        Ok(())
    }

    fn set_column_metadata(
        &self,
        table_id: &str,
        column: &str,
        provider: &str,
        metadata: &Metadata,
    ) -> ClientResult<()> {
        self.injected(Operation::SetMetadata)?;
        let mut state = lock(&self.state);
        let table = state.table_mut(table_id)?;
        let position = table.position(column).ok_or_else(|| {
            ClientError::not_found(format!(
                "The column \"{column}\" was not found in the table \"{table_id}\"."
            ))
        })?;
        table.columns[position]
            .metadata
            .extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        drop(state);
        self.record(StorageCall::SetMetadata {
            target: format!("{table_id}.{column}"),
            provider: provider.to_string(),
            metadata: metadata.clone(),
        });
        Ok(())
    }

    fn delete_table_rows(&self, table_id: &str, filter: &DeleteFilter) -> ClientResult<()> {
        self.injected(Operation::DeleteRows)?;
        let state = lock(&self.state);
        let table = state.table(table_id)?;
        if table.position(&filter.column).is_none() {
            return Err(ClientError::bad_request(format!(
                "Cannot filter by column \"{}\", the column does not exist.",
                filter.column
            )));
        }
        drop(state);
        self.record(StorageCall::DeleteRows {
            table_id: table_id.to_string(),
            filter: filter.clone(),
        });
        Ok(())
    }
}
