//! Output-mapping settings and per-table mapping configuration.
//!
//! Both are loaded from a single YAML document:
//!
//! ```yaml
//! settings:
//!   enforce_schema: true
//!   component_id: keboola.ex-db-snowflake
//!   configuration_id: "123"
//! tables:
//!   - destination: out.c-main.orders
//!     schema:
//!       - name: id
//!         data_type: {base: {type: STRING}}
//!         primary_key: true
//!         nullable: false
//! ```

use std::{fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::{schema::SchemaColumn, storage_api::DeleteOperator};

pub const DEFAULT_COMPONENT_ID: &str = "keboola.output-mapping";

/// Job-wide switches that steer reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputMappingSettings {
    /// Validate and apply typed schemas; when off, schemas only name columns.
    pub enforce_schema: bool,
    /// Report length and nullable differences as errors instead of changing
    /// the stored column.
    pub strict_attributes: bool,
    /// Base types that may be mapped onto an untyped table.
    pub untyped_safe_types: Vec<String>,
    pub branch_id: Option<String>,
    pub component_id: String,
    pub configuration_id: Option<String>,
    pub configuration_row_id: Option<String>,
}

impl Default for OutputMappingSettings {
    fn default() -> Self {
        Self {
            enforce_schema: true,
            strict_attributes: false,
            untyped_safe_types: vec!["STRING".to_string()],
            branch_id: None,
            component_id: DEFAULT_COMPONENT_ID.to_string(),
            configuration_id: None,
            configuration_row_id: None,
        }
    }
}

impl OutputMappingSettings {
    pub fn is_untyped_safe(&self, base_type: &str) -> bool {
        self.untyped_safe_types
            .iter()
            .any(|safe| safe.trim().eq_ignore_ascii_case(base_type.trim()))
    }
}

/// Desired state of one destination table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableMapping {
    /// Full table id, e.g. `out.c-main.orders`.
    pub destination: String,
    #[serde(default)]
    pub schema: Vec<SchemaColumn>,
    /// Column names for mappings without a schema.
    #[serde(default)]
    pub columns: Vec<String>,
    /// Primary key for mappings without a schema.
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub incremental: bool,
    #[serde(default)]
    pub delete_where_column: Option<String>,
    #[serde(default)]
    pub delete_where_operator: DeleteOperator,
    #[serde(default)]
    pub delete_where_values: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl TableMapping {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            schema: Vec::new(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            incremental: false,
            delete_where_column: None,
            delete_where_operator: DeleteOperator::Eq,
            delete_where_values: Vec::new(),
            description: None,
        }
    }

    pub fn with_schema(mut self, schema: Vec<SchemaColumn>) -> Self {
        self.schema = schema;
        self
    }

    pub fn has_schema(&self) -> bool {
        !self.schema.is_empty()
    }
}

/// A mapping document: settings plus the tables to reconcile, in order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingFile {
    #[serde(default)]
    pub settings: OutputMappingSettings,
    #[serde(default)]
    pub tables: Vec<TableMapping>,
}

impl MappingFile {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening mapping file {path:?}"))?;
        let reader = BufReader::new(file);
        let mapping: MappingFile =
            serde_yaml::from_reader(reader).context("Parsing mapping YAML")?;
        Ok(mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_default_to_enforced_string_only() {
        let settings = OutputMappingSettings::default();
        assert!(settings.enforce_schema);
        assert!(!settings.strict_attributes);
        assert!(settings.is_untyped_safe("string"));
        assert!(!settings.is_untyped_safe("NUMERIC"));
    }

    #[test]
    fn mapping_yaml_parses_tables_and_delete_filter() {
        let yaml = r#"
settings:
  enforce_schema: false
  branch_id: "42"
tables:
  - destination: out.c-main.orders
    columns: [id, amount]
    primary_key: [id]
    incremental: true
    delete_where_column: status
    delete_where_operator: ne
    delete_where_values: [open]
  - destination: out.c-main.customers
    schema:
      - name: id
        data_type:
          base: {type: STRING, length: 64}
        primary_key: true
"#;
        let mapping: MappingFile = serde_yaml::from_str(yaml).expect("mapping yaml");
        assert!(!mapping.settings.enforce_schema);
        assert_eq!(mapping.settings.branch_id.as_deref(), Some("42"));
        assert_eq!(mapping.settings.component_id, DEFAULT_COMPONENT_ID);
        assert_eq!(mapping.tables.len(), 2);

        let orders = &mapping.tables[0];
        assert!(orders.incremental);
        assert_eq!(orders.delete_where_operator, DeleteOperator::Ne);
        assert_eq!(orders.delete_where_values, vec!["open"]);
        assert!(!orders.has_schema());

        let customers = &mapping.tables[1];
        assert_eq!(customers.schema[0].data_type.base().length.as_deref(), Some("64"));
        assert_eq!(customers.delete_where_operator, DeleteOperator::Eq);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let yaml = "tables:\n  - destination: out.c-main.t\n    colums: [a]\n";
        assert!(serde_yaml::from_str::<MappingFile>(yaml).is_err());
    }
}
