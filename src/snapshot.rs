//! Read-only views of remote table and bucket state.
//!
//! Snapshots are parsed from Storage API JSON on every reconciliation and are
//! never cached or mutated locally.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    backend::Backend,
    error::{OutputMappingError, Result},
    identifier,
};

/// Stored definition of one typed column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub type_name: String,
    pub nullable: bool,
    pub length: Option<String>,
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedColumn {
    pub name: String,
    pub definition: ColumnDefinition,
    pub basetype: String,
    pub can_be_filtered: bool,
}

/// Column layout of a stored table; typed tables carry definitions, untyped
/// tables only names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableColumns {
    Typed(Vec<TypedColumn>),
    Untyped(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSnapshot {
    pub id: String,
    pub name: String,
    pub backend: Backend,
    pub columns: TableColumns,
    pub primary_key: Vec<String>,
}

impl TableSnapshot {
    pub fn from_json(value: &Value) -> Result<Self> {
        let raw: RawTable = serde_json::from_value(value.clone()).map_err(|err| {
            OutputMappingError::invalid_output(format!("Malformed table response: {err}"))
        })?;
        let backend_name = raw
            .backend
            .clone()
            .or_else(|| raw.bucket.as_ref().and_then(|bucket| bucket.backend.clone()))
            .ok_or_else(|| {
                OutputMappingError::invalid_output(format!(
                    "Table \"{}\" response does not name its backend",
                    raw.id
                ))
            })?;
        let backend: Backend = backend_name.parse()?;

        let (columns, primary_key) = if raw.is_typed {
            let definition = raw.definition.ok_or_else(|| {
                OutputMappingError::invalid_output(format!(
                    "Typed table \"{}\" response is missing its definition",
                    raw.id
                ))
            })?;
            let columns = definition
                .columns
                .into_iter()
                .map(|column| TypedColumn {
                    name: column.name,
                    definition: ColumnDefinition {
                        type_name: column.definition.type_name,
                        nullable: column.definition.nullable,
                        length: scalar_to_string(column.definition.length),
                        default: scalar_to_string(column.definition.default),
                    },
                    basetype: column.basetype.unwrap_or_default(),
                    can_be_filtered: column.can_be_filtered,
                })
                .collect();
            let primary_key = definition.primary_keys_names.unwrap_or(raw.primary_key);
            (TableColumns::Typed(columns), primary_key)
        } else {
            (TableColumns::Untyped(raw.columns), raw.primary_key)
        };

        let name = raw
            .name
            .unwrap_or_else(|| raw.id.rsplit('.').next().unwrap_or_default().to_string());
        Ok(TableSnapshot {
            id: raw.id,
            name,
            backend,
            columns,
            primary_key,
        })
    }

    pub fn is_typed(&self) -> bool {
        matches!(self.columns, TableColumns::Typed(_))
    }

    pub fn column_names(&self) -> Vec<String> {
        match &self.columns {
            TableColumns::Typed(columns) => columns.iter().map(|c| c.name.clone()).collect(),
            TableColumns::Untyped(names) => names.clone(),
        }
    }

    pub fn column_count(&self) -> usize {
        match &self.columns {
            TableColumns::Typed(columns) => columns.len(),
            TableColumns::Untyped(names) => names.len(),
        }
    }

    /// Normalized form of `name` under this table's backend identifier limit.
    pub fn normalize(&self, name: &str) -> String {
        identifier::normalize_for(name, self.backend)
    }

    pub fn has_column(&self, name: &str) -> bool {
        let wanted = self.normalize(name);
        self.column_names()
            .iter()
            .any(|existing| self.normalize(existing) == wanted)
    }

    pub fn typed_column(&self, name: &str) -> Option<&TypedColumn> {
        let wanted = self.normalize(name);
        match &self.columns {
            TableColumns::Typed(columns) => columns
                .iter()
                .find(|column| self.normalize(&column.name) == wanted),
            TableColumns::Untyped(_) => None,
        }
    }
}

/// Just enough of a table to pass between preparer, validator and modifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub id: String,
    pub name: String,
    pub backend: Backend,
    pub columns: Vec<String>,
    pub primary_key: Vec<String>,
    pub is_typed: bool,
}

impl From<&TableSnapshot> for TableInfo {
    fn from(snapshot: &TableSnapshot) -> Self {
        TableInfo {
            id: snapshot.id.clone(),
            name: snapshot.name.clone(),
            backend: snapshot.backend,
            columns: snapshot.column_names(),
            primary_key: snapshot.primary_key.clone(),
            is_typed: snapshot.is_typed(),
        }
    }
}

impl TableInfo {
    pub fn from_json(value: &Value) -> Result<Self> {
        TableSnapshot::from_json(value).map(|snapshot| TableInfo::from(&snapshot))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    pub id: String,
    pub stage: String,
    pub name: String,
    pub backend: Backend,
    pub metadata: Vec<MetadataEntry>,
}

impl BucketInfo {
    pub fn from_json(value: &Value) -> Result<Self> {
        let raw: RawBucket = serde_json::from_value(value.clone()).map_err(|err| {
            OutputMappingError::invalid_output(format!("Malformed bucket response: {err}"))
        })?;
        let (stage_from_id, name_from_id) = raw.id.split_once('.').unwrap_or(("", raw.id.as_str()));
        let stage = raw.stage.unwrap_or_else(|| stage_from_id.to_string());
        let name = raw.name.unwrap_or_else(|| name_from_id.to_string());
        Ok(BucketInfo {
            backend: raw.backend.parse()?,
            id: raw.id,
            stage,
            name,
            metadata: raw.metadata,
        })
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.value.as_str())
    }
}

fn scalar_to_string(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTable {
    id: String,
    name: Option<String>,
    #[serde(default)]
    is_typed: bool,
    backend: Option<String>,
    bucket: Option<RawTableBucket>,
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    primary_key: Vec<String>,
    definition: Option<RawDefinition>,
}

#[derive(Debug, Deserialize)]
struct RawTableBucket {
    backend: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDefinition {
    #[serde(default)]
    columns: Vec<RawTypedColumn>,
    primary_keys_names: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTypedColumn {
    name: String,
    definition: RawColumnDefinition,
    basetype: Option<String>,
    #[serde(default)]
    can_be_filtered: bool,
}

#[derive(Debug, Deserialize)]
struct RawColumnDefinition {
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default = "default_nullable")]
    nullable: bool,
    length: Option<Value>,
    default: Option<Value>,
}

const fn default_nullable() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RawBucket {
    id: String,
    stage: Option<String>,
    name: Option<String>,
    backend: String,
    #[serde(default)]
    metadata: Vec<MetadataEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_typed_table() {
        let snapshot = TableSnapshot::from_json(&json!({
            "id": "in.c-main.orders",
            "name": "orders",
            "isTyped": true,
            "bucket": {"id": "in.c-main", "backend": "snowflake"},
            "columns": ["id", "amount"],
            "primaryKey": ["id"],
            "definition": {
                "primaryKeysNames": ["id"],
                "columns": [
                    {"name": "id", "definition": {"type": "VARCHAR", "nullable": false, "length": "255"}, "basetype": "STRING", "canBeFiltered": true},
                    {"name": "amount", "definition": {"type": "NUMBER", "nullable": true, "length": 38, "default": null}, "basetype": "NUMERIC"}
                ]
            }
        }))
        .expect("typed snapshot");
        assert!(snapshot.is_typed());
        assert_eq!(snapshot.backend, Backend::Snowflake);
        assert_eq!(snapshot.primary_key, vec!["id"]);
        let amount = snapshot.typed_column("AMOUNT").expect("amount column");
        assert_eq!(amount.definition.length.as_deref(), Some("38"));
        assert_eq!(amount.definition.default, None);
        assert_eq!(amount.basetype, "NUMERIC");
    }

    #[test]
    fn parses_untyped_table_with_top_level_backend() {
        let snapshot = TableSnapshot::from_json(&json!({
            "id": "in.c-main.events",
            "isTyped": false,
            "backend": "bigquery",
            "columns": ["id", "payload"],
            "primaryKey": []
        }))
        .expect("untyped snapshot");
        assert!(!snapshot.is_typed());
        assert_eq!(snapshot.name, "events");
        assert_eq!(snapshot.column_names(), vec!["id", "payload"]);
        assert!(snapshot.has_column("Payload"));
        assert!(snapshot.typed_column("id").is_none());
    }

    #[test]
    fn missing_backend_is_invalid_output() {
        let err = TableSnapshot::from_json(&json!({"id": "in.c-main.t", "columns": []}))
            .expect_err("no backend");
        assert!(err.to_string().contains("does not name its backend"));
    }

    #[test]
    fn bucket_info_derives_stage_and_name_from_id() {
        let bucket = BucketInfo::from_json(&json!({
            "id": "out.c-reports",
            "backend": "snowflake",
            "metadata": [{"key": "KBC.createdBy.branch.id", "value": "1234", "provider": "system"}]
        }))
        .expect("bucket");
        assert_eq!(bucket.stage, "out");
        assert_eq!(bucket.name, "c-reports");
        assert_eq!(bucket.metadata_value("KBC.createdBy.branch.id"), Some("1234"));
    }
}
