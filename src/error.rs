//! Error taxonomy for table-structure reconciliation.
//!
//! Structural mismatches are collected as [`StructureViolation`] records and
//! rendered into one message only when the error is displayed, so callers that
//! pattern-match on the text always see every violation in detection order.

use std::fmt;

use thiserror::Error;

use crate::storage_api::ClientError;

/// What kind of disagreement a [`StructureViolation`] describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    Type { table: String, schema: String },
    Length { table: String, schema: String },
    Nullable { table: bool, schema: bool },
    ColumnCount { table: usize, schema: usize },
    ColumnsNotInSchema { columns: Vec<String> },
    PrimaryKey { table: Vec<String>, schema: Vec<String> },
    UntypedUnsupportedType { base_type: String },
    UntypedNewColumns { columns: Vec<String> },
    DuplicateColumns { columns: Vec<String> },
    UnsupportedType { base_type: String, backend: String },
}

/// One structural disagreement between a schema and a stored table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureViolation {
    pub table_id: String,
    pub column: Option<String>,
    pub kind: ViolationKind,
}

impl StructureViolation {
    pub fn column(table_id: &str, column: &str, kind: ViolationKind) -> Self {
        Self {
            table_id: table_id.to_string(),
            column: Some(column.to_string()),
            kind,
        }
    }

    pub fn table(table_id: &str, kind: ViolationKind) -> Self {
        Self {
            table_id: table_id.to_string(),
            column: None,
            kind,
        }
    }
}

impl fmt::Display for StructureViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = &self.table_id;
        let column = self.column.as_deref().unwrap_or_default();
        match &self.kind {
            ViolationKind::Type { table: stored, schema } => write!(
                f,
                "Table \"{table}\" column \"{column}\" has different type than the schema. \
                 Table type: \"{stored}\", schema type: \"{schema}\"."
            ),
            ViolationKind::Length { table: stored, schema } => write!(
                f,
                "Table \"{table}\" column \"{column}\" has different length than the schema. \
                 Table length: \"{stored}\", schema length: \"{schema}\"."
            ),
            ViolationKind::Nullable { table: stored, schema } => write!(
                f,
                "Table \"{table}\" column \"{column}\" has different nullable than the schema. \
                 Table nullable: \"{stored}\", schema nullable: \"{schema}\"."
            ),
            ViolationKind::ColumnCount { table: stored, schema } => write!(
                f,
                "Table \"{table}\" does not contain the same number of columns as the schema. \
                 Table columns: {stored}, schema columns: {schema}."
            ),
            ViolationKind::ColumnsNotInSchema { columns } => write!(
                f,
                "Schema of table \"{table}\" does not contain columns: \"{}\".",
                columns.join(", ")
            ),
            ViolationKind::PrimaryKey { table: stored, schema } => write!(
                f,
                "Table primary keys does not contain the same number of columns as the schema. \
                 Table primary keys: \"{}\", schema primary keys: \"{}\".",
                stored.join(", "),
                schema.join(", ")
            ),
            ViolationKind::UntypedUnsupportedType { base_type } => write!(
                f,
                "Table \"{table}\" is untyped, but schema column \"{column}\" has unsupported type \"{base_type}\"."
            ),
            ViolationKind::UntypedNewColumns { columns } => write!(
                f,
                "Cannot add columns to untyped table \"{table}\". Columns: \"{}\".",
                columns.join(", ")
            ),
            ViolationKind::DuplicateColumns { columns } => write!(
                f,
                "Schema of table \"{table}\" defines columns more than once: \"{}\".",
                columns.join(", ")
            ),
            ViolationKind::UnsupportedType { base_type, backend } => write!(
                f,
                "Table \"{table}\" column \"{column}\" has type \"{base_type}\" which is not supported on backend \"{backend}\"."
            ),
        }
    }
}

/// Every violation found during one validation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructureViolations(Vec<StructureViolation>);

impl StructureViolations {
    pub fn push(&mut self, violation: StructureViolation) {
        self.0.push(violation);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StructureViolation> {
        self.0.iter()
    }
}

impl fmt::Display for StructureViolations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, violation) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{violation}")?;
        }
        Ok(())
    }
}

/// Main error type for output-mapping operations.
#[derive(Error, Debug)]
pub enum OutputMappingError {
    /// Schema and stored table disagree in a way that cannot be healed.
    #[error("{0}")]
    InvalidTableStructure(StructureViolations),

    /// Remote operation failed or a precondition of the mapping does not hold.
    #[error("{message}")]
    InvalidOutput {
        message: String,
        code: Option<u16>,
        #[source]
        source: Option<ClientError>,
    },

    #[error("Backend \"{0}\" is not supported.")]
    UnsupportedBackend(String),

    #[error("Base type \"{base_type}\" is not supported on backend \"{backend}\".")]
    UnsupportedType { backend: String, base_type: String },

    /// Raw schema configuration could not be turned into a column.
    #[error("Invalid schema column: {0}")]
    InvalidSchemaColumn(String),
}

impl OutputMappingError {
    pub fn invalid_output(message: impl Into<String>) -> Self {
        OutputMappingError::InvalidOutput {
            message: message.into(),
            code: None,
            source: None,
        }
    }

    /// Wrap a remote failure, keeping its text verbatim after `context` and its
    /// HTTP status as the error code.
    pub fn remote(context: impl fmt::Display, err: ClientError) -> Self {
        OutputMappingError::InvalidOutput {
            message: format!("{context}: {}", err.message),
            code: Some(err.code),
            source: Some(err),
        }
    }

    /// Re-raise a remote failure without extra context.
    pub fn passthrough(err: ClientError) -> Self {
        OutputMappingError::InvalidOutput {
            message: err.message.clone(),
            code: Some(err.code),
            source: Some(err),
        }
    }

    pub fn code(&self) -> Option<u16> {
        match self {
            OutputMappingError::InvalidOutput { code, .. } => *code,
            _ => None,
        }
    }

    pub fn violations(&self) -> Option<&StructureViolations> {
        match self {
            OutputMappingError::InvalidTableStructure(violations) => Some(violations),
            _ => None,
        }
    }
}

/// Result type alias for output-mapping operations.
pub type Result<T> = std::result::Result<T, OutputMappingError>;
