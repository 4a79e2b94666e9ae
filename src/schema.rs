//! Desired column model.
//!
//! A [`SchemaColumn`] is built once from job configuration and never changes
//! afterwards. Its [`ColumnDataType`] always carries a `base` definition;
//! backend entries override it for their backend only.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};

use crate::{
    backend::Backend,
    error::{OutputMappingError, Result},
};

/// `{type, length, default}` for one backend (or for `base`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataTypeSpec {
    pub type_name: String,
    pub length: Option<String>,
    pub default: Option<String>,
}

impl DataTypeSpec {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            length: None,
            default: None,
        }
    }

    pub fn with_length(mut self, length: impl Into<String>) -> Self {
        self.length = Some(length.into());
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDataType {
    base: DataTypeSpec,
    backends: BTreeMap<Backend, DataTypeSpec>,
}

impl ColumnDataType {
    /// Base types are kept uppercased; backend types are kept as written.
    pub fn new(base: DataTypeSpec) -> Self {
        let mut base = base;
        base.type_name = base.type_name.trim().to_ascii_uppercase();
        Self {
            base,
            backends: BTreeMap::new(),
        }
    }

    pub fn with_backend(mut self, backend: Backend, spec: DataTypeSpec) -> Self {
        self.backends.insert(backend, spec);
        self
    }

    pub fn base(&self) -> &DataTypeSpec {
        &self.base
    }

    pub fn for_backend(&self, backend: Backend) -> Option<&DataTypeSpec> {
        self.backends.get(&backend)
    }

    pub fn has_backend_specific_types(&self) -> bool {
        !self.backends.is_empty()
    }

    pub fn backends(&self) -> impl Iterator<Item = (&Backend, &DataTypeSpec)> {
        self.backends.iter()
    }

    /// Length effective on `backend`: the backend entry when present, else base.
    pub fn length_for(&self, backend: Backend) -> Option<&str> {
        match self.for_backend(backend) {
            Some(spec) => spec.length.as_deref(),
            None => self.base.length.as_deref(),
        }
    }

    pub fn default_for(&self, backend: Backend) -> Option<&str> {
        self.for_backend(backend)
            .and_then(|spec| spec.default.as_deref())
            .or(self.base.default.as_deref())
    }
}

/// One desired column of an output table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaColumn {
    pub name: String,
    pub data_type: ColumnDataType,
    pub nullable: bool,
    pub primary_key: bool,
    pub description: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl SchemaColumn {
    pub fn new(name: impl Into<String>, data_type: ColumnDataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            primary_key: false,
            description: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn with_primary_key(mut self, primary_key: bool) -> Self {
        self.primary_key = primary_key;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Build a column from a raw configuration map (JSON shape).
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let raw: RawSchemaColumn = serde_json::from_value(value.clone())
            .map_err(|err| OutputMappingError::InvalidSchemaColumn(err.to_string()))?;
        SchemaColumn::from_raw(raw)
    }

    pub fn base_type(&self) -> &str {
        &self.data_type.base().type_name
    }
}

/// Names of the columns flagged as primary key, in schema order.
pub fn primary_key_names(columns: &[SchemaColumn]) -> Vec<String> {
    columns
        .iter()
        .filter(|column| column.primary_key)
        .map(|column| column.name.clone())
        .collect()
}

impl<'de> Deserialize<'de> for SchemaColumn {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawSchemaColumn::deserialize(deserializer)?;
        SchemaColumn::from_raw(raw).map_err(serde::de::Error::custom)
    }
}

/// Scalars in configuration may arrive as strings, numbers or booleans.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
    Flag(bool),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Text(value) => value,
            Scalar::Integer(value) => value.to_string(),
            Scalar::Float(value) => value.to_string(),
            Scalar::Flag(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDataTypeSpec {
    #[serde(rename = "type")]
    type_name: Option<String>,
    length: Option<Scalar>,
    default: Option<Scalar>,
}

#[derive(Debug, Deserialize)]
struct RawSchemaColumn {
    name: Option<String>,
    data_type: Option<BTreeMap<String, RawDataTypeSpec>>,
    #[serde(default = "default_nullable")]
    nullable: bool,
    #[serde(default)]
    primary_key: bool,
    description: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, Scalar>,
}

const fn default_nullable() -> bool {
    true
}

impl RawDataTypeSpec {
    fn into_spec(self, column: &str, key: &str) -> Result<DataTypeSpec> {
        let type_name = self
            .type_name
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                OutputMappingError::InvalidSchemaColumn(format!(
                    "Column \"{column}\" is missing data_type.{key}.type"
                ))
            })?;
        Ok(DataTypeSpec {
            type_name,
            length: self.length.map(Scalar::into_string),
            default: self.default.map(Scalar::into_string),
        })
    }
}

impl SchemaColumn {
    fn from_raw(raw: RawSchemaColumn) -> Result<Self> {
        let name = raw
            .name
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                OutputMappingError::InvalidSchemaColumn("Column name must not be empty".to_string())
            })?;
        let mut entries = raw.data_type.ok_or_else(|| {
            OutputMappingError::InvalidSchemaColumn(format!(
                "Column \"{name}\" is missing data_type.base.type"
            ))
        })?;
        let base = entries
            .remove("base")
            .ok_or_else(|| {
                OutputMappingError::InvalidSchemaColumn(format!(
                    "Column \"{name}\" is missing data_type.base.type"
                ))
            })?
            .into_spec(&name, "base")?;

        let mut data_type = ColumnDataType::new(base);
        for (key, spec) in entries {
            let backend: Backend = key.parse()?;
            data_type = data_type.with_backend(backend, spec.into_spec(&name, &key)?);
        }

        Ok(SchemaColumn {
            name,
            data_type,
            nullable: raw.nullable,
            primary_key: raw.primary_key,
            description: raw.description,
            metadata: raw
                .metadata
                .into_iter()
                .map(|(key, value)| (key, value.into_string()))
                .collect(),
        })
    }
}
