//! Change-set produced by validation and consumed by the structure modifier.

use crate::{
    backend::{Backend, DEFAULT_MAX_IDENTIFIER_LENGTH},
    identifier,
    schema::SchemaColumn,
};

/// What should happen to the primary key of a stored table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PrimaryKeyChange {
    /// Leave the stored primary key untouched.
    #[default]
    NoChange,
    /// Drop the stored primary key.
    Reset,
    /// Replace the stored primary key with these columns, in this order.
    SetTo(Vec<SchemaColumn>),
}

impl PrimaryKeyChange {
    pub fn column_names(&self) -> Vec<String> {
        match self {
            PrimaryKeyChange::SetTo(columns) => columns.iter().map(|c| c.name.clone()).collect(),
            PrimaryKeyChange::NoChange | PrimaryKeyChange::Reset => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableChangesStore {
    missing_columns: Vec<SchemaColumn>,
    different_column_attributes: Vec<SchemaColumn>,
    primary_key_change: PrimaryKeyChange,
    identifier_limit: usize,
}

impl Default for TableChangesStore {
    fn default() -> Self {
        Self {
            missing_columns: Vec::new(),
            different_column_attributes: Vec::new(),
            primary_key_change: PrimaryKeyChange::NoChange,
            identifier_limit: DEFAULT_MAX_IDENTIFIER_LENGTH,
        }
    }
}

impl TableChangesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that compares column names with the identifier limit of `backend`.
    pub fn for_backend(backend: Backend) -> Self {
        Self {
            identifier_limit: backend.max_identifier_length(),
            ..Self::default()
        }
    }

    /// Record a column that storage does not have yet. A column already
    /// recorded in either list is ignored.
    pub fn add_missing_column(&mut self, column: SchemaColumn) {
        if !self.contains(&column.name) {
            self.missing_columns.push(column);
        }
    }

    /// Record a stored column whose attributes should be changed.
    pub fn add_column_attribute_changes(&mut self, column: SchemaColumn) {
        if !self.contains(&column.name) {
            self.different_column_attributes.push(column);
        }
    }

    pub fn set_primary_key_change(&mut self, change: PrimaryKeyChange) {
        self.primary_key_change = change;
    }

    pub fn missing_columns(&self) -> &[SchemaColumn] {
        &self.missing_columns
    }

    pub fn has_missing_columns(&self) -> bool {
        !self.missing_columns.is_empty()
    }

    pub fn different_column_attributes(&self) -> &[SchemaColumn] {
        &self.different_column_attributes
    }

    pub fn has_different_column_attributes(&self) -> bool {
        !self.different_column_attributes.is_empty()
    }

    pub fn primary_key_change(&self) -> &PrimaryKeyChange {
        &self.primary_key_change
    }

    pub fn has_primary_key_change(&self) -> bool {
        self.primary_key_change != PrimaryKeyChange::NoChange
    }

    pub fn is_empty(&self) -> bool {
        !self.has_missing_columns()
            && !self.has_different_column_attributes()
            && !self.has_primary_key_change()
    }

    fn contains(&self, name: &str) -> bool {
        let wanted = identifier::normalize_with_limit(name, self.identifier_limit);
        self.missing_columns
            .iter()
            .chain(self.different_column_attributes.iter())
            .any(|column| identifier::normalize_with_limit(&column.name, self.identifier_limit) == wanted)
    }
}
