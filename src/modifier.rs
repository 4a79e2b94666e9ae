//! Applies a validated change-set to a stored table.
//!
//! Mutations run in a fixed order: add missing columns, change attributes of
//! existing columns, then replace the primary key. Every added column is
//! resolved before the first call is issued. A remote failure stops the run;
//! mutations already issued stay applied.

use log::{debug, info, warn};

use crate::{
    changes::{PrimaryKeyChange, TableChangesStore},
    datatype,
    error::{OutputMappingError, Result},
    schema::SchemaColumn,
    snapshot::{BucketInfo, TableInfo, TableSnapshot, TypedColumn},
    storage_api::{ColumnAttributeChanges, ColumnSpec, StorageApi},
};

pub struct TableStructureModifier<'a, S: StorageApi + ?Sized> {
    storage: &'a S,
}

impl<'a, S: StorageApi + ?Sized> TableStructureModifier<'a, S> {
    pub fn new(storage: &'a S) -> Self {
        Self { storage }
    }

    pub fn update_table_structure(
        &self,
        bucket: &BucketInfo,
        table: &TableInfo,
        changes: &TableChangesStore,
    ) -> Result<()> {
        if changes.is_empty() {
            debug!("Table '{}' needs no structure changes", table.id);
            return Ok(());
        }
        let live = self.live_table(table)?;
        for column in changes.missing_columns() {
            if live.has_column(&column.name) {
                return Err(OutputMappingError::invalid_output(format!(
                    "Column \"{}\" already exists in table \"{}\".",
                    column.name, table.id
                )));
            }
        }
        debug!(
            "Updating structure of table '{}' in bucket '{}'",
            table.id, bucket.id
        );

        let additions = changes
            .missing_columns()
            .iter()
            .map(|column| Ok((column, column_spec(&live, column)?)))
            .collect::<Result<Vec<_>>>()?;
        for (column, spec) in &additions {
            self.add_column(&live, column, spec)?;
        }
        for column in changes.different_column_attributes() {
            self.modify_column(&live, column)?;
        }
        self.apply_primary_key(table, changes.primary_key_change())
    }

    fn live_table(&self, table: &TableInfo) -> Result<TableSnapshot> {
        let value = self.storage.get_table(&table.id).map_err(|err| {
            OutputMappingError::remote(format!("Cannot load table \"{}\"", table.id), err)
        })?;
        TableSnapshot::from_json(&value)
    }

    fn add_column(&self, live: &TableSnapshot, column: &SchemaColumn, spec: &ColumnSpec) -> Result<()> {
        self.storage
            .add_table_column(&live.id, &column.name, spec)
            .map_err(|err| {
                OutputMappingError::remote(
                    format!(
                        "Cannot add column \"{}\" to table \"{}\" in Storage API",
                        column.name, live.id
                    ),
                    err,
                )
            })?;
        info!("Added column '{}' to table '{}'", column.name, live.id);
        Ok(())
    }

    fn modify_column(&self, live: &TableSnapshot, column: &SchemaColumn) -> Result<()> {
        let Some(stored) = live.typed_column(&column.name) else {
            return Err(OutputMappingError::invalid_output(format!(
                "Column \"{}\" does not exist in table \"{}\".",
                column.name, live.id
            )));
        };
        let changes = attribute_changes(column, stored, live);
        if changes.is_empty() {
            debug!(
                "Column '{}' of table '{}' already matches the schema",
                column.name, live.id
            );
            return Ok(());
        }
        self.storage
            .update_table_column(&live.id, &stored.name, &changes)
            .map_err(|err| {
                OutputMappingError::remote(
                    format!(
                        "Cannot change column \"{}\" of table \"{}\" in Storage API",
                        column.name, live.id
                    ),
                    err,
                )
            })?;
        info!(
            "Changed column '{}' of table '{}': {:?}",
            column.name, live.id, changes
        );
        Ok(())
    }

    fn apply_primary_key(&self, table: &TableInfo, change: &PrimaryKeyChange) -> Result<()> {
        let columns = match change {
            PrimaryKeyChange::NoChange => return Ok(()),
            PrimaryKeyChange::Reset => Vec::new(),
            PrimaryKeyChange::SetTo(_) => change.column_names(),
        };
        self.storage
            .set_table_primary_key(&table.id, &columns)
            .map_err(|err| {
                OutputMappingError::remote(
                    format!("Cannot change primary key of table \"{}\" in Storage API", table.id),
                    err,
                )
            })?;
        if columns.is_empty() {
            info!("Removed primary key of table '{}'", table.id);
        } else {
            info!(
                "Set primary key of table '{}' to {}",
                table.id,
                columns.join(", ")
            );
        }
        Ok(())
    }
}

/// Storage refuses to add a required column without a default, such a column
/// is added as nullable.
fn column_spec(live: &TableSnapshot, column: &SchemaColumn) -> Result<ColumnSpec> {
    if !live.is_typed() {
        return Ok(ColumnSpec::Untyped);
    }
    let mut definition = datatype::resolve_native_type(column, live.backend)?;
    if !definition.nullable && definition.default.is_none() {
        warn!(
            "Column '{}' of table '{}' is required but has no default value, adding it as nullable",
            column.name, live.id
        );
        definition.nullable = true;
    }
    Ok(ColumnSpec::Typed {
        definition,
        basetype: Some(datatype::resolve_basetype(column, live.backend)),
    })
}

/// Only attributes that differ from the stored definition are sent.
pub fn attribute_changes(
    column: &SchemaColumn,
    stored: &TypedColumn,
    live: &TableSnapshot,
) -> ColumnAttributeChanges {
    let definition = &stored.definition;
    let mut changes = ColumnAttributeChanges::default();
    if let Some(length) = column.data_type.length_for(live.backend) {
        let current = definition.length.as_deref().unwrap_or_default();
        if !datatype::lengths_equal(current, length) {
            changes.length = Some(length.to_string());
        }
    }
    if definition.nullable != column.nullable {
        changes.nullable = Some(column.nullable);
    }
    if let Some(default) = column.data_type.default_for(live.backend) {
        if definition.default.as_deref() != Some(default) {
            changes.default = Some(default.to_string());
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::Backend,
        schema::{ColumnDataType, DataTypeSpec},
        storage_api::memory::{InMemoryStorage, StorageCall, StoredBucket, StoredColumn, StoredTable},
    };

    fn storage() -> InMemoryStorage {
        let storage = InMemoryStorage::new(Backend::Snowflake);
        storage.insert_bucket(StoredBucket::new("in.c-main", Backend::Snowflake));
        storage.insert_table(StoredTable::new(
            "in.c-main",
            "items",
            true,
            vec![StoredColumn::typed("name", "VARCHAR", Some("10"), true, "STRING")],
        ));
        storage
    }

    fn bucket_and_table(storage: &InMemoryStorage) -> (BucketInfo, TableInfo) {
        let bucket = BucketInfo::from_json(&storage.get_bucket("in.c-main").unwrap()).unwrap();
        let table = TableInfo::from_json(&storage.get_table("in.c-main.items").unwrap()).unwrap();
        (bucket, table)
    }

    #[test]
    fn only_changed_attributes_are_sent() {
        let storage = storage();
        let (bucket, table) = bucket_and_table(&storage);
        let mut changes = TableChangesStore::new();
        changes.add_column_attribute_changes(SchemaColumn::new(
            "name",
            ColumnDataType::new(DataTypeSpec::new("STRING").with_length("20")),
        ));
        TableStructureModifier::new(&storage)
            .update_table_structure(&bucket, &table, &changes)
            .expect("update");
        assert_eq!(
            storage.calls(),
            vec![StorageCall::UpdateColumn {
                table_id: "in.c-main.items".to_string(),
                column: "name".to_string(),
                changes: ColumnAttributeChanges {
                    length: Some("20".to_string()),
                    ..ColumnAttributeChanges::default()
                },
            }]
        );
    }

    #[test]
    fn unresolvable_column_stops_before_any_addition() {
        let storage = storage();
        let (bucket, table) = bucket_and_table(&storage);
        let mut changes = TableChangesStore::new();
        changes.add_missing_column(SchemaColumn::new(
            "note",
            ColumnDataType::new(DataTypeSpec::new("STRING")),
        ));
        changes.add_missing_column(SchemaColumn::new(
            "area",
            ColumnDataType::new(DataTypeSpec::new("GEOMETRY")),
        ));
        let err = TableStructureModifier::new(&storage)
            .update_table_structure(&bucket, &table, &changes)
            .expect_err("unknown type");
        assert!(matches!(err, OutputMappingError::UnsupportedType { .. }));
        assert!(storage.calls().is_empty());
    }

    #[test]
    fn empty_change_set_issues_nothing() {
        let storage = storage();
        let (bucket, table) = bucket_and_table(&storage);
        TableStructureModifier::new(&storage)
            .update_table_structure(&bucket, &table, &TableChangesStore::new())
            .expect("noop");
        assert!(storage.calls().is_empty());
    }

    #[test]
    fn added_typed_column_carries_resolved_definition() {
        let storage = storage();
        let (bucket, table) = bucket_and_table(&storage);
        let mut changes = TableChangesStore::new();
        changes.add_missing_column(SchemaColumn::new(
            "price",
            ColumnDataType::new(DataTypeSpec::new("NUMERIC").with_length("12,2")),
        ));
        TableStructureModifier::new(&storage)
            .update_table_structure(&bucket, &table, &changes)
            .expect("add");
        let stored = storage.stored_table("in.c-main.items").expect("table");
        let price = &stored.columns[1];
        let definition = price.definition.as_ref().expect("typed");
        assert_eq!(definition.type_name, "NUMBER");
        assert_eq!(definition.length.as_deref(), Some("12,2"));
        assert_eq!(price.basetype.as_deref(), Some("NUMERIC"));
    }
}
