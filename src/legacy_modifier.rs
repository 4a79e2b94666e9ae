//! Structure reconciliation for mappings that only list column names and a
//! primary key.
//!
//! Missing columns are added by name. Primary key problems never fail the
//! mapping: they are logged and the previous key is kept.

use itertools::Itertools;
use log::{debug, info, warn};

use crate::{
    backend::Backend,
    error::{OutputMappingError, Result},
    identifier,
    snapshot::{BucketInfo, TableInfo},
    storage_api::{ColumnSpec, StorageApi},
};

pub struct LegacyTableStructureModifier<'a, S: StorageApi + ?Sized> {
    storage: &'a S,
}

impl<'a, S: StorageApi + ?Sized> LegacyTableStructureModifier<'a, S> {
    pub fn new(storage: &'a S) -> Self {
        Self { storage }
    }

    pub fn update_table_structure(
        &self,
        bucket: &BucketInfo,
        table: &TableInfo,
        desired_columns: &[String],
        desired_primary_key: &[String],
    ) -> Result<()> {
        let columns = clean_key_array(desired_columns);
        let primary_key = clean_key_array(desired_primary_key);
        debug!(
            "Reconciling table '{}' in bucket '{}' by column names",
            table.id, bucket.id
        );

        let stored = identifier::normalize_all_for(table.columns.iter().map(String::as_str), table.backend);
        for column in &columns {
            if stored.contains(&identifier::normalize_for(column, table.backend)) {
                continue;
            }
            self.storage
                .add_table_column(&table.id, column, &ColumnSpec::Untyped)
                .map_err(|err| {
                    OutputMappingError::remote(
                        format!(
                            "Cannot add column \"{column}\" to table \"{}\" in Storage API",
                            table.id
                        ),
                        err,
                    )
                })?;
            info!("Added column '{}' to table '{}'", column, table.id);
        }

        if !primary_key_differs(&table.primary_key, &primary_key, table.backend) {
            return Ok(());
        }
        let known = table
            .columns
            .iter()
            .chain(columns.iter())
            .map(|name| identifier::normalize_for(name, table.backend))
            .unique()
            .collect_vec();
        let unknown = primary_key
            .iter()
            .any(|key| !known.contains(&identifier::normalize_for(key, table.backend)));
        if unknown {
            warn!(
                "Output mapping does not match destination table: primary key \"{}\" does not match \"{}\" in \"{}\".",
                primary_key.join(", "),
                table.primary_key.join(", "),
                table.id
            );
            return Ok(());
        }
        self.change_primary_key(table, &primary_key);
        Ok(())
    }

    fn change_primary_key(&self, table: &TableInfo, primary_key: &[String]) {
        match self.storage.set_table_primary_key(&table.id, primary_key) {
            Ok(()) => info!(
                "Changed primary key of table '{}' from \"{}\" to \"{}\"",
                table.id,
                table.primary_key.join(", "),
                primary_key.join(", ")
            ),
            Err(err) => {
                warn!(
                    "Error changing primary key of table {}: {}",
                    table.id, err.message
                );
                self.restore_primary_key(table);
            }
        }
    }

    fn restore_primary_key(&self, table: &TableInfo) {
        let current = match self.storage.get_table(&table.id) {
            Ok(value) => TableInfo::from_json(&value).map(|info| info.primary_key),
            Err(err) => Err(OutputMappingError::passthrough(err)),
        };
        match current {
            Ok(current) if !primary_key_differs(&current, &table.primary_key, table.backend) => {
                debug!("Primary key of table '{}' is unchanged", table.id);
            }
            Ok(_) => {
                if let Err(err) = self
                    .storage
                    .set_table_primary_key(&table.id, &table.primary_key)
                {
                    warn!(
                        "Error restoring primary key of table {}: {}",
                        table.id, err.message
                    );
                }
            }
            Err(err) => warn!(
                "Cannot verify primary key of table {} after a failed change: {err}",
                table.id
            ),
        }
    }
}

/// Trim entries and drop empty ones.
fn clean_key_array(values: &[String]) -> Vec<String> {
    let mut cleaned = Vec::with_capacity(values.len());
    for value in values {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            warn!("Found empty column name in key array.");
            continue;
        }
        cleaned.push(trimmed.to_string());
    }
    cleaned
}

fn primary_key_differs(current: &[String], desired: &[String], backend: Backend) -> bool {
    identifier::normalize_all_for(current.iter().map(String::as_str), backend)
        != identifier::normalize_all_for(desired.iter().map(String::as_str), backend)
}
