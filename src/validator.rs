//! Structure validation: compares a desired schema with a stored table and
//! produces the change-set needed to reconcile them.
//!
//! Every violation found in one pass is collected before failing, so a single
//! [`OutputMappingError::InvalidTableStructure`] carries the complete picture.

use std::collections::HashSet;

use itertools::Itertools;
use log::{debug, warn};

use crate::{
    changes::{PrimaryKeyChange, TableChangesStore},
    config::OutputMappingSettings,
    datatype,
    error::{OutputMappingError, Result, StructureViolation, StructureViolations, ViolationKind},
    identifier,
    schema::SchemaColumn,
    snapshot::{TableSnapshot, TypedColumn},
    storage_api::StorageApi,
};

pub struct TableStructureValidator<'a, S: StorageApi + ?Sized> {
    storage: &'a S,
    settings: &'a OutputMappingSettings,
}

impl<'a, S: StorageApi + ?Sized> TableStructureValidator<'a, S> {
    pub fn new(storage: &'a S, settings: &'a OutputMappingSettings) -> Self {
        Self { storage, settings }
    }

    /// Fetch `table_id` and validate `schema` against it.
    ///
    /// Nothing is fetched when schema enforcement is off or the schema is
    /// empty. A table that does not exist yet validates to an empty
    /// change-set.
    pub fn validate_table(&self, table_id: &str, schema: &[SchemaColumn]) -> Result<TableChangesStore> {
        if self.skips(schema) {
            debug!("Skipping structure validation of table '{table_id}'");
            return Ok(TableChangesStore::new());
        }
        let value = match self.storage.get_table(table_id) {
            Ok(value) => value,
            Err(err) if err.is_not_found() => {
                debug!("Table '{table_id}' does not exist yet, nothing to validate");
                return Ok(TableChangesStore::new());
            }
            Err(err) => return Err(OutputMappingError::passthrough(err)),
        };
        let snapshot = TableSnapshot::from_json(&value)?;
        self.validate(schema, &snapshot)
    }

    /// Validate `schema` against an already fetched snapshot.
    pub fn validate(&self, schema: &[SchemaColumn], snapshot: &TableSnapshot) -> Result<TableChangesStore> {
        if self.skips(schema) {
            return Ok(TableChangesStore::new());
        }
        let mut pass = ValidationPass::new(snapshot);
        pass.check_duplicate_names(schema);
        if snapshot.is_typed() {
            pass.compare_typed_columns(schema, self.settings.strict_attributes);
        } else {
            pass.compare_untyped_columns(schema, self.settings);
        }
        pass.check_column_count(schema);
        pass.check_existence(schema);
        pass.check_primary_key(schema);
        pass.finish()
    }

    fn skips(&self, schema: &[SchemaColumn]) -> bool {
        !self.settings.enforce_schema || schema.is_empty()
    }
}

/// State of one validation run over one snapshot.
struct ValidationPass<'s> {
    snapshot: &'s TableSnapshot,
    store: TableChangesStore,
    violations: StructureViolations,
    absent: usize,
}

impl<'s> ValidationPass<'s> {
    fn new(snapshot: &'s TableSnapshot) -> Self {
        Self {
            snapshot,
            store: TableChangesStore::for_backend(snapshot.backend),
            violations: StructureViolations::default(),
            absent: 0,
        }
    }

    /// Names that normalize to the same identifier would silently collapse
    /// into one column.
    fn check_duplicate_names(&mut self, schema: &[SchemaColumn]) {
        let duplicates = schema
            .iter()
            .map(|column| self.snapshot.normalize(&column.name))
            .duplicates()
            .collect::<HashSet<_>>();
        if duplicates.is_empty() {
            return;
        }
        let columns = schema
            .iter()
            .filter(|column| duplicates.contains(&self.snapshot.normalize(&column.name)))
            .map(|column| column.name.clone())
            .collect_vec();
        self.violations.push(StructureViolation::table(
            &self.snapshot.id,
            ViolationKind::DuplicateColumns { columns },
        ));
    }

    fn compare_typed_columns(&mut self, schema: &[SchemaColumn], strict: bool) {
        let backend = self.snapshot.backend;
        for column in schema {
            let Some(stored) = self.snapshot.typed_column(&column.name) else {
                debug!(
                    "Column '{}' is missing in table '{}'",
                    column.name, self.snapshot.id
                );
                self.absent += 1;
                if datatype::resolve_native_type(column, backend).is_err() {
                    self.violations.push(StructureViolation::column(
                        &self.snapshot.id,
                        &column.name,
                        ViolationKind::UnsupportedType {
                            base_type: column.base_type().to_string(),
                            backend: backend.to_string(),
                        },
                    ));
                    continue;
                }
                self.store.add_missing_column(column.clone());
                continue;
            };
            self.compare_type(column, stored);
            if self.attributes_differ(column, stored, strict) {
                self.store.add_column_attribute_changes(column.clone());
            }
        }
    }

    fn compare_type(&mut self, column: &SchemaColumn, stored: &TypedColumn) {
        let backend = self.snapshot.backend;
        let stored_native = &stored.definition.type_name;
        let kind = match column.data_type.for_backend(backend) {
            Some(specific) => {
                if datatype::native_types_equal(backend, stored_native, &specific.type_name) {
                    return;
                }
                ViolationKind::Type {
                    table: stored_native.clone(),
                    schema: specific.type_name.clone(),
                }
            }
            None => {
                let stored_base = if stored.basetype.is_empty() {
                    datatype::canonicalize(stored_native, backend).to_string()
                } else {
                    stored.basetype.to_ascii_uppercase()
                };
                if stored_base == column.base_type() {
                    return;
                }
                // Base types that land on the same native type (INTEGER and
                // NUMERIC on Snowflake) are the same stored type.
                let same_native = datatype::resolve_native_type(column, backend)
                    .map(|resolved| {
                        datatype::native_types_equal(backend, stored_native, &resolved.type_name)
                    })
                    .unwrap_or(false);
                if same_native {
                    return;
                }
                ViolationKind::Type {
                    table: stored_base,
                    schema: column.base_type().to_string(),
                }
            }
        };
        self.violations
            .push(StructureViolation::column(&self.snapshot.id, &column.name, kind));
    }

    /// Records strict violations and reports whether healable attributes differ.
    fn attributes_differ(&mut self, column: &SchemaColumn, stored: &TypedColumn, strict: bool) -> bool {
        let backend = self.snapshot.backend;
        let definition = &stored.definition;
        let mut healable = false;

        if let Some(length) = column.data_type.length_for(backend) {
            let stored_length = definition.length.as_deref().unwrap_or_default();
            if !datatype::lengths_equal(stored_length, length) {
                if strict {
                    self.violations.push(StructureViolation::column(
                        &self.snapshot.id,
                        &column.name,
                        ViolationKind::Length {
                            table: stored_length.to_string(),
                            schema: length.to_string(),
                        },
                    ));
                } else {
                    healable = true;
                }
            }
        }

        if definition.nullable != column.nullable {
            if strict {
                self.violations.push(StructureViolation::column(
                    &self.snapshot.id,
                    &column.name,
                    ViolationKind::Nullable {
                        table: definition.nullable,
                        schema: column.nullable,
                    },
                ));
            } else {
                healable = true;
            }
        }

        if let Some(default) = column.data_type.default_for(backend) {
            if definition.default.as_deref() != Some(default) {
                healable = true;
            }
        }
        healable
    }

    fn compare_untyped_columns(&mut self, schema: &[SchemaColumn], settings: &OutputMappingSettings) {
        let mut absent = Vec::new();
        for column in schema {
            if !settings.is_untyped_safe(column.base_type()) {
                self.violations.push(StructureViolation::column(
                    &self.snapshot.id,
                    &column.name,
                    ViolationKind::UntypedUnsupportedType {
                        base_type: column.base_type().to_string(),
                    },
                ));
            }
            if column.data_type.has_backend_specific_types() {
                warn!(
                    "Table \"{}\" is untyped, but schema has set specific backend column \"{}\".",
                    self.snapshot.id, column.name
                );
            }
            if !self.snapshot.has_column(&column.name) {
                absent.push(column.name.clone());
            }
        }
        if !absent.is_empty() {
            self.absent = absent.len();
            self.violations.push(StructureViolation::table(
                &self.snapshot.id,
                ViolationKind::UntypedNewColumns { columns: absent },
            ));
        }
    }

    fn check_column_count(&mut self, schema: &[SchemaColumn]) {
        let stored = self.snapshot.column_count();
        if stored != schema.len().saturating_sub(self.absent) {
            self.violations.push(StructureViolation::table(
                &self.snapshot.id,
                ViolationKind::ColumnCount {
                    table: stored,
                    schema: schema.len(),
                },
            ));
        }
    }

    fn check_existence(&mut self, schema: &[SchemaColumn]) {
        let wanted: HashSet<String> = schema
            .iter()
            .map(|column| self.snapshot.normalize(&column.name))
            .collect();
        let unknown = self
            .snapshot
            .column_names()
            .into_iter()
            .filter(|name| !wanted.contains(&self.snapshot.normalize(name)))
            .collect_vec();
        if !unknown.is_empty() {
            self.violations.push(StructureViolation::table(
                &self.snapshot.id,
                ViolationKind::ColumnsNotInSchema { columns: unknown },
            ));
        }
    }

    fn check_primary_key(&mut self, schema: &[SchemaColumn]) {
        let schema_key = schema.iter().filter(|c| c.primary_key).collect_vec();
        let backend = self.snapshot.backend;
        let schema_names =
            identifier::normalize_all_for(schema_key.iter().map(|c| c.name.as_str()), backend);
        let table_names =
            identifier::normalize_all_for(self.snapshot.primary_key.iter().map(String::as_str), backend);

        let change = if schema_names == table_names {
            PrimaryKeyChange::NoChange
        } else if schema_names.is_empty() {
            PrimaryKeyChange::Reset
        } else if table_names.is_empty() {
            PrimaryKeyChange::SetTo(schema_key.into_iter().cloned().collect())
        } else {
            self.violations.push(StructureViolation::table(
                &self.snapshot.id,
                ViolationKind::PrimaryKey {
                    table: self.snapshot.primary_key.clone(),
                    schema: schema_key.iter().map(|c| c.name.clone()).collect(),
                },
            ));
            return;
        };
        debug!(
            "Primary key change for table '{}': {:?}",
            self.snapshot.id, change
        );
        self.store.set_primary_key_change(change);
    }

    fn finish(self) -> Result<TableChangesStore> {
        if self.violations.is_empty() {
            Ok(self.store)
        } else {
            Err(OutputMappingError::InvalidTableStructure(self.violations))
        }
    }
}
