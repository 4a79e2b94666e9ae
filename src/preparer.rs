//! Per-table orchestration: bucket, table, structure, metadata and data
//! modification, in that order.

use log::{debug, info};

use crate::{
    changes::{PrimaryKeyChange, TableChangesStore},
    config::{OutputMappingSettings, TableMapping},
    creator::{self, Destination, SystemMetadata},
    error::{OutputMappingError, Result},
    identifier,
    legacy_modifier::LegacyTableStructureModifier,
    modifier::{self, TableStructureModifier},
    schema,
    snapshot::{BucketInfo, TableInfo, TableSnapshot},
    storage_api::{ColumnAttributeChanges, DeleteFilter, Metadata, StorageApi},
    validator::TableStructureValidator,
};

pub const DESCRIPTION_KEY: &str = "KBC.description";

/// What reconciling one mapping would do, computed without mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TablePlan {
    Create {
        typed: bool,
        columns: Vec<String>,
        primary_key: Vec<String>,
    },
    /// Change-set plus, per column in `different_column_attributes`, the
    /// attributes that would be sent.
    Update {
        changes: TableChangesStore,
        attributes: Vec<ColumnAttributeChanges>,
    },
    Legacy {
        missing_columns: Vec<String>,
        primary_key: Option<Vec<String>>,
    },
}

impl TablePlan {
    pub fn is_noop(&self) -> bool {
        match self {
            TablePlan::Create { .. } => false,
            TablePlan::Update { changes, .. } => changes.is_empty(),
            TablePlan::Legacy {
                missing_columns,
                primary_key,
            } => missing_columns.is_empty() && primary_key.is_none(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTable {
    pub table_id: String,
    pub create_bucket: bool,
    pub plan: TablePlan,
    pub delete_rows: Option<DeleteFilter>,
}

pub struct StoragePreparer<'a, S: StorageApi + ?Sized> {
    storage: &'a S,
    settings: &'a OutputMappingSettings,
}

impl<'a, S: StorageApi + ?Sized> StoragePreparer<'a, S> {
    pub fn new(storage: &'a S, settings: &'a OutputMappingSettings) -> Self {
        Self { storage, settings }
    }

    /// Bring the destination of `mapping` into a state that can receive data.
    pub fn prepare(&self, mapping: &TableMapping) -> Result<TableInfo> {
        let destination = Destination::parse(&mapping.destination)?;
        let table_id = destination.table_id();
        let bucket = creator::ensure_destination_bucket(
            self.storage,
            &destination,
            &SystemMetadata::from(self.settings),
        )?;

        match self.lookup_table(&table_id)? {
            None => {
                self.create_table(&bucket, &destination, mapping)?;
                if let Some(description) = &mapping.description {
                    self.write_table_description(&table_id, description)?;
                }
            }
            Some(snapshot) => {
                self.reconcile(&bucket, &snapshot, mapping)?;
                if let Some(description) = &mapping.description {
                    self.write_table_description(&table_id, description)?;
                }
                if let Some(filter) = delete_filter(mapping) {
                    self.delete_rows(&table_id, &filter)?;
                }
            }
        }
        self.write_column_metadata(&table_id, mapping)?;

        let value = self
            .storage
            .get_table(&table_id)
            .map_err(OutputMappingError::passthrough)?;
        TableInfo::from_json(&value)
    }

    /// Compute what [`prepare`](Self::prepare) would do. Structural
    /// violations fail the plan exactly as they would fail preparation.
    pub fn plan(&self, mapping: &TableMapping) -> Result<PlannedTable> {
        let destination = Destination::parse(&mapping.destination)?;
        let table_id = destination.table_id();
        let create_bucket = match self.storage.get_bucket(&destination.bucket_id()) {
            Ok(_) => false,
            Err(err) if err.is_not_found() => true,
            Err(err) => return Err(OutputMappingError::passthrough(err)),
        };

        let (plan, delete_rows) = match self.lookup_table(&table_id)? {
            None => {
                let (columns, primary_key) = desired_layout(mapping);
                let plan = TablePlan::Create {
                    typed: self.creates_typed(mapping),
                    columns,
                    primary_key,
                };
                (plan, None)
            }
            Some(snapshot) => {
                let plan = if self.settings.enforce_schema && mapping.has_schema() {
                    let validator = TableStructureValidator::new(self.storage, self.settings);
                    let changes = validator.validate(&mapping.schema, &snapshot)?;
                    let attributes = planned_attributes(&changes, &snapshot);
                    TablePlan::Update {
                        changes,
                        attributes,
                    }
                } else {
                    legacy_plan(&snapshot, mapping)
                };
                (plan, delete_filter(mapping))
            }
        };
        Ok(PlannedTable {
            table_id,
            create_bucket,
            plan,
            delete_rows,
        })
    }

    fn lookup_table(&self, table_id: &str) -> Result<Option<TableSnapshot>> {
        match self.storage.get_table(table_id) {
            Ok(value) => TableSnapshot::from_json(&value).map(Some),
            Err(err) if err.is_not_found() => {
                debug!("Table '{table_id}' does not exist");
                Ok(None)
            }
            Err(err) => Err(OutputMappingError::remote(
                format!("Cannot load table \"{table_id}\" from Storage API"),
                err,
            )),
        }
    }

    fn creates_typed(&self, mapping: &TableMapping) -> bool {
        self.settings.enforce_schema && mapping.has_schema()
    }

    fn create_table(
        &self,
        bucket: &BucketInfo,
        destination: &Destination,
        mapping: &TableMapping,
    ) -> Result<String> {
        if self.creates_typed(mapping) {
            let definition =
                creator::build_table_definition(&destination.table, &mapping.schema, bucket.backend)?;
            return creator::create_table_definition(self.storage, &bucket.id, &definition);
        }
        let (columns, primary_key) = desired_layout(mapping);
        creator::create_table(
            self.storage,
            &bucket.id,
            &destination.table,
            &columns,
            &primary_key,
        )
    }

    fn reconcile(&self, bucket: &BucketInfo, snapshot: &TableSnapshot, mapping: &TableMapping) -> Result<()> {
        let table = TableInfo::from(snapshot);
        if self.settings.enforce_schema && mapping.has_schema() {
            let validator = TableStructureValidator::new(self.storage, self.settings);
            let changes = validator.validate(&mapping.schema, snapshot)?;
            return TableStructureModifier::new(self.storage)
                .update_table_structure(bucket, &table, &changes);
        }
        let (columns, primary_key) = desired_layout(mapping);
        LegacyTableStructureModifier::new(self.storage).update_table_structure(
            bucket,
            &table,
            &columns,
            &primary_key,
        )
    }

    fn write_table_description(&self, table_id: &str, description: &str) -> Result<()> {
        let metadata = Metadata::from([(DESCRIPTION_KEY.to_string(), description.to_string())]);
        self.storage
            .set_table_metadata(table_id, &self.settings.component_id, &metadata)
            .map_err(|err| {
                OutputMappingError::remote(
                    format!("Cannot set metadata of table \"{table_id}\" in Storage API"),
                    err,
                )
            })
    }

    fn write_column_metadata(&self, table_id: &str, mapping: &TableMapping) -> Result<()> {
        for column in &mapping.schema {
            let mut metadata = column.metadata.clone();
            if let Some(description) = &column.description {
                metadata.insert(DESCRIPTION_KEY.to_string(), description.clone());
            }
            if metadata.is_empty() {
                continue;
            }
            self.storage
                .set_column_metadata(table_id, &column.name, &self.settings.component_id, &metadata)
                .map_err(|err| {
                    OutputMappingError::remote(
                        format!(
                            "Cannot set metadata of column \"{}\" in table \"{table_id}\" in Storage API",
                            column.name
                        ),
                        err,
                    )
                })?;
        }
        Ok(())
    }

    fn delete_rows(&self, table_id: &str, filter: &DeleteFilter) -> Result<()> {
        self.storage
            .delete_table_rows(table_id, filter)
            .map_err(|err| {
                OutputMappingError::remote(
                    format!("Cannot delete rows from table \"{table_id}\" in Storage API"),
                    err,
                )
            })?;
        info!(
            "Deleted rows of table '{table_id}' where '{}' {} [{}]",
            filter.column,
            filter.operator.as_str(),
            filter.values.join(", ")
        );
        Ok(())
    }
}

/// Column names and primary key a mapping asks for; the schema wins over the
/// plain column list.
fn desired_layout(mapping: &TableMapping) -> (Vec<String>, Vec<String>) {
    if mapping.has_schema() {
        (
            mapping.schema.iter().map(|c| c.name.clone()).collect(),
            schema::primary_key_names(&mapping.schema),
        )
    } else {
        (mapping.columns.clone(), mapping.primary_key.clone())
    }
}

/// Rows are only deleted from existing tables loaded incrementally.
fn delete_filter(mapping: &TableMapping) -> Option<DeleteFilter> {
    if !mapping.incremental {
        return None;
    }
    let column = mapping.delete_where_column.as_deref()?.trim();
    if column.is_empty() {
        return None;
    }
    Some(DeleteFilter {
        column: column.to_string(),
        operator: mapping.delete_where_operator,
        values: mapping.delete_where_values.clone(),
    })
}

fn planned_attributes(changes: &TableChangesStore, snapshot: &TableSnapshot) -> Vec<ColumnAttributeChanges> {
    changes
        .different_column_attributes()
        .iter()
        .map(|column| {
            snapshot
                .typed_column(&column.name)
                .map(|stored| modifier::attribute_changes(column, stored, snapshot))
                .unwrap_or_default()
        })
        .collect()
}

fn legacy_plan(snapshot: &TableSnapshot, mapping: &TableMapping) -> TablePlan {
    let (columns, primary_key) = desired_layout(mapping);
    let missing_columns = columns
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty() && !snapshot.has_column(c))
        .collect();
    let primary_key: Vec<String> = primary_key
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    let differs = identifier::normalize_all_for(primary_key.iter().map(String::as_str), snapshot.backend)
        != identifier::normalize_all_for(snapshot.primary_key.iter().map(String::as_str), snapshot.backend);
    TablePlan::Legacy {
        missing_columns,
        primary_key: differs.then_some(primary_key),
    }
}

/// Human-readable rows for a plan: `(action, column, detail)`.
pub fn describe_plan(plan: &TablePlan) -> Vec<(String, String, String)> {
    let mut rows = Vec::new();
    match plan {
        TablePlan::Create {
            typed,
            columns,
            primary_key,
        } => {
            let kind = if *typed { "typed" } else { "untyped" };
            rows.push((
                "create table".to_string(),
                columns.join(", "),
                format!("{kind}, primary key [{}]", primary_key.join(", ")),
            ));
        }
        TablePlan::Update {
            changes,
            attributes,
        } => {
            for column in changes.missing_columns() {
                rows.push((
                    "add column".to_string(),
                    column.name.clone(),
                    column.base_type().to_string(),
                ));
            }
            for (index, column) in changes.different_column_attributes().iter().enumerate() {
                rows.push((
                    "change column".to_string(),
                    column.name.clone(),
                    attributes
                        .get(index)
                        .map(ColumnAttributeChanges::describe)
                        .unwrap_or_default(),
                ));
            }
            match changes.primary_key_change() {
                PrimaryKeyChange::NoChange => {}
                PrimaryKeyChange::Reset => {
                    rows.push(("drop primary key".to_string(), String::new(), String::new()))
                }
                change @ PrimaryKeyChange::SetTo(_) => rows.push((
                    "set primary key".to_string(),
                    change.column_names().join(", "),
                    String::new(),
                )),
            }
        }
        TablePlan::Legacy {
            missing_columns,
            primary_key,
        } => {
            for column in missing_columns {
                rows.push(("add column".to_string(), column.clone(), String::new()));
            }
            if let Some(primary_key) = primary_key {
                rows.push((
                    "set primary key".to_string(),
                    primary_key.join(", "),
                    "skipped with a warning when not applicable".to_string(),
                ));
            }
        }
    }
    rows
}
