//! Backend-aware data type catalog.
//!
//! Each backend carries three static tables:
//!
//! - **base → native**: which physical type a backend-agnostic base type
//!   becomes when a column does not name one explicitly,
//! - **synonyms**: native spellings that the backend treats as the same type
//!   (Snowflake `TEXT` is `VARCHAR`, BigQuery `INTEGER` is `INT64`),
//! - **native → base**: the base type reported for a canonical native type.
//!
//! Native comparisons always go through the synonym table, so
//! `TIMESTAMP_LTZ`, `TIMESTAMP_NTZ` and `TIMESTAMP_TZ` stay distinct even
//! though all three share the `TIMESTAMP` base type.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    backend::Backend,
    error::{OutputMappingError, Result},
    schema::SchemaColumn,
};

/// Backend-agnostic logical column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BaseType {
    String,
    Integer,
    Numeric,
    Float,
    Boolean,
    Date,
    Timestamp,
}

impl BaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BaseType::String => "STRING",
            BaseType::Integer => "INTEGER",
            BaseType::Numeric => "NUMERIC",
            BaseType::Float => "FLOAT",
            BaseType::Boolean => "BOOLEAN",
            BaseType::Date => "DATE",
            BaseType::Timestamp => "TIMESTAMP",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &[
            "STRING",
            "INTEGER",
            "NUMERIC",
            "FLOAT",
            "BOOLEAN",
            "DATE",
            "TIMESTAMP",
        ]
    }
}

impl fmt::Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BaseType {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "STRING" => Ok(BaseType::String),
            "INTEGER" => Ok(BaseType::Integer),
            "NUMERIC" => Ok(BaseType::Numeric),
            "FLOAT" => Ok(BaseType::Float),
            "BOOLEAN" => Ok(BaseType::Boolean),
            "DATE" => Ok(BaseType::Date),
            "TIMESTAMP" => Ok(BaseType::Timestamp),
            _ => Err(format!(
                "Unknown base type '{value}'. Supported types: {}",
                BaseType::variants().join(", ")
            )),
        }
    }
}

struct BackendTypeTable {
    base_to_native: &'static [(BaseType, &'static str)],
    synonyms: &'static [(&'static str, &'static str)],
    native_to_base: &'static [(&'static str, BaseType)],
}

const SNOWFLAKE: BackendTypeTable = BackendTypeTable {
    base_to_native: &[
        (BaseType::String, "VARCHAR"),
        (BaseType::Integer, "NUMBER"),
        (BaseType::Numeric, "NUMBER"),
        (BaseType::Float, "FLOAT"),
        (BaseType::Boolean, "BOOLEAN"),
        (BaseType::Date, "DATE"),
        (BaseType::Timestamp, "TIMESTAMP_LTZ"),
    ],
    synonyms: &[
        ("TEXT", "VARCHAR"),
        ("STRING", "VARCHAR"),
        ("CHAR", "VARCHAR"),
        ("CHARACTER", "VARCHAR"),
        ("NCHAR", "VARCHAR"),
        ("NVARCHAR", "VARCHAR"),
        ("NVARCHAR2", "VARCHAR"),
        ("CHAR VARYING", "VARCHAR"),
        ("NCHAR VARYING", "VARCHAR"),
        ("INT", "NUMBER"),
        ("INTEGER", "NUMBER"),
        ("BIGINT", "NUMBER"),
        ("SMALLINT", "NUMBER"),
        ("TINYINT", "NUMBER"),
        ("BYTEINT", "NUMBER"),
        ("DECIMAL", "NUMBER"),
        ("NUMERIC", "NUMBER"),
        ("FLOAT4", "FLOAT"),
        ("FLOAT8", "FLOAT"),
        ("DOUBLE", "FLOAT"),
        ("DOUBLE PRECISION", "FLOAT"),
        ("REAL", "FLOAT"),
        ("TIMESTAMP", "TIMESTAMP_NTZ"),
        ("DATETIME", "TIMESTAMP_NTZ"),
        ("VARBINARY", "BINARY"),
    ],
    native_to_base: &[
        ("VARCHAR", BaseType::String),
        ("NUMBER", BaseType::Numeric),
        ("FLOAT", BaseType::Float),
        ("BOOLEAN", BaseType::Boolean),
        ("DATE", BaseType::Date),
        ("TIMESTAMP_NTZ", BaseType::Timestamp),
        ("TIMESTAMP_LTZ", BaseType::Timestamp),
        ("TIMESTAMP_TZ", BaseType::Timestamp),
    ],
};

const BIGQUERY: BackendTypeTable = BackendTypeTable {
    base_to_native: &[
        (BaseType::String, "STRING"),
        (BaseType::Integer, "INT64"),
        (BaseType::Numeric, "NUMERIC"),
        (BaseType::Float, "FLOAT64"),
        (BaseType::Boolean, "BOOL"),
        (BaseType::Date, "DATE"),
        (BaseType::Timestamp, "TIMESTAMP"),
    ],
    synonyms: &[
        ("INT", "INT64"),
        ("INTEGER", "INT64"),
        ("SMALLINT", "INT64"),
        ("BIGINT", "INT64"),
        ("TINYINT", "INT64"),
        ("BYTEINT", "INT64"),
        ("FLOAT", "FLOAT64"),
        ("BOOLEAN", "BOOL"),
        ("DECIMAL", "NUMERIC"),
        ("BIGDECIMAL", "BIGNUMERIC"),
    ],
    native_to_base: &[
        ("STRING", BaseType::String),
        ("INT64", BaseType::Integer),
        ("NUMERIC", BaseType::Numeric),
        ("BIGNUMERIC", BaseType::Numeric),
        ("FLOAT64", BaseType::Float),
        ("BOOL", BaseType::Boolean),
        ("DATE", BaseType::Date),
        ("TIMESTAMP", BaseType::Timestamp),
        ("DATETIME", BaseType::Timestamp),
    ],
};

const SYNAPSE: BackendTypeTable = BackendTypeTable {
    base_to_native: &[
        (BaseType::String, "NVARCHAR"),
        (BaseType::Integer, "INT"),
        (BaseType::Numeric, "DECIMAL"),
        (BaseType::Float, "FLOAT"),
        (BaseType::Boolean, "BIT"),
        (BaseType::Date, "DATE"),
        (BaseType::Timestamp, "DATETIME2"),
    ],
    synonyms: &[("INTEGER", "INT"), ("NUMERIC", "DECIMAL")],
    native_to_base: &[
        ("NVARCHAR", BaseType::String),
        ("VARCHAR", BaseType::String),
        ("NCHAR", BaseType::String),
        ("CHAR", BaseType::String),
        ("INT", BaseType::Integer),
        ("BIGINT", BaseType::Integer),
        ("SMALLINT", BaseType::Integer),
        ("TINYINT", BaseType::Integer),
        ("DECIMAL", BaseType::Numeric),
        ("FLOAT", BaseType::Float),
        ("REAL", BaseType::Float),
        ("BIT", BaseType::Boolean),
        ("DATE", BaseType::Date),
        ("DATETIME2", BaseType::Timestamp),
        ("DATETIME", BaseType::Timestamp),
        ("SMALLDATETIME", BaseType::Timestamp),
        ("DATETIMEOFFSET", BaseType::Timestamp),
    ],
};

const EXASOL: BackendTypeTable = BackendTypeTable {
    base_to_native: &[
        (BaseType::String, "VARCHAR"),
        (BaseType::Integer, "DECIMAL"),
        (BaseType::Numeric, "DECIMAL"),
        (BaseType::Float, "DOUBLE PRECISION"),
        (BaseType::Boolean, "BOOLEAN"),
        (BaseType::Date, "DATE"),
        (BaseType::Timestamp, "TIMESTAMP"),
    ],
    synonyms: &[
        ("NUMERIC", "DECIMAL"),
        ("NUMBER", "DECIMAL"),
        ("INT", "DECIMAL"),
        ("INTEGER", "DECIMAL"),
        ("BIGINT", "DECIMAL"),
        ("SMALLINT", "DECIMAL"),
        ("TINYINT", "DECIMAL"),
        ("DOUBLE", "DOUBLE PRECISION"),
        ("FLOAT", "DOUBLE PRECISION"),
        ("REAL", "DOUBLE PRECISION"),
        ("CHAR VARYING", "VARCHAR"),
        ("NVARCHAR", "VARCHAR"),
        ("NVARCHAR2", "VARCHAR"),
        ("VARCHAR2", "VARCHAR"),
        ("BOOL", "BOOLEAN"),
    ],
    native_to_base: &[
        ("VARCHAR", BaseType::String),
        ("CHAR", BaseType::String),
        ("DECIMAL", BaseType::Numeric),
        ("DOUBLE PRECISION", BaseType::Float),
        ("BOOLEAN", BaseType::Boolean),
        ("DATE", BaseType::Date),
        ("TIMESTAMP", BaseType::Timestamp),
        ("TIMESTAMP WITH LOCAL TIME ZONE", BaseType::Timestamp),
    ],
};

fn table_for(backend: Backend) -> &'static BackendTypeTable {
    match backend {
        Backend::Snowflake => &SNOWFLAKE,
        Backend::Bigquery => &BIGQUERY,
        Backend::Synapse => &SYNAPSE,
        Backend::Exasol => &EXASOL,
    }
}

/// A column definition resolved for one backend, ready to be sent to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDefinition {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<String>,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Native type a base type becomes on `backend`.
pub fn native_for_base(backend: Backend, base: BaseType) -> &'static str {
    table_for(backend)
        .base_to_native
        .iter()
        .find(|(candidate, _)| *candidate == base)
        .map(|(_, native)| *native)
        .unwrap_or("VARCHAR")
}

/// Canonical spelling of a native type: uppercased, parameters stripped,
/// synonyms folded.
pub fn canonical_native(backend: Backend, native: &str) -> String {
    let trimmed = native.trim();
    let without_params = match trimmed.find('(') {
        Some(idx) => trimmed[..idx].trim_end(),
        None => trimmed,
    };
    let upper = without_params
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_uppercase();
    table_for(backend)
        .synonyms
        .iter()
        .find(|(alias, _)| *alias == upper)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(upper)
}

pub fn native_types_equal(backend: Backend, left: &str, right: &str) -> bool {
    canonical_native(backend, left) == canonical_native(backend, right)
}

/// Base type a backend-reported native type belongs to. Types the catalog does
/// not know (semi-structured, binary, time-of-day) are stored as strings.
pub fn canonicalize(native: &str, backend: Backend) -> BaseType {
    let canonical = canonical_native(backend, native);
    table_for(backend)
        .native_to_base
        .iter()
        .find(|(candidate, _)| *candidate == canonical)
        .map(|(_, base)| *base)
        .unwrap_or(BaseType::String)
}

/// Resolve the effective definition of `column` on `backend`.
///
/// A backend-specific entry wins over `base`: its type and length are used as
/// given, and its default falls back to the base default. Without one, the
/// base type is mapped through the backend table, which fails with
/// [`OutputMappingError::UnsupportedType`] for base types the catalog does not
/// know.
pub fn resolve_native_type(column: &SchemaColumn, backend: Backend) -> Result<ResolvedDefinition> {
    let base = column.data_type.base();
    if let Some(specific) = column.data_type.for_backend(backend) {
        return Ok(ResolvedDefinition {
            type_name: specific.type_name.clone(),
            length: specific.length.clone(),
            nullable: column.nullable,
            default: specific.default.clone().or_else(|| base.default.clone()),
        });
    }
    let base_type = BaseType::from_str(&base.type_name).map_err(|_| {
        OutputMappingError::UnsupportedType {
            backend: backend.to_string(),
            base_type: base.type_name.clone(),
        }
    })?;
    Ok(ResolvedDefinition {
        type_name: native_for_base(backend, base_type).to_string(),
        length: base.length.clone(),
        nullable: column.nullable,
        default: base.default.clone(),
    })
}

/// Base type storage reports for `column` once it exists on `backend`.
pub fn resolve_basetype(column: &SchemaColumn, backend: Backend) -> String {
    match column.data_type.for_backend(backend) {
        Some(specific) => canonicalize(&specific.type_name, backend).to_string(),
        None => column.base_type().to_string(),
    }
}

/// Lengths compare without whitespace, so `38, 2` equals `38,2`.
pub fn lengths_equal(left: &str, right: &str) -> bool {
    let squash = |value: &str| value.chars().filter(|c| !c.is_whitespace()).collect::<String>();
    squash(left).eq_ignore_ascii_case(&squash(right))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDataType, DataTypeSpec};

    #[test]
    fn basetype_follows_backend_override() {
        let column = column_with(
            ColumnDataType::new(DataTypeSpec::new("STRING"))
                .with_backend(Backend::Snowflake, DataTypeSpec::new("NUMBER")),
        );
        assert_eq!(resolve_basetype(&column, Backend::Snowflake), "NUMERIC");
        assert_eq!(resolve_basetype(&column, Backend::Bigquery), "STRING");
        assert!(lengths_equal("38, 2", "38,2"));
        assert!(!lengths_equal("255", "25"));
    }

    fn column_with(data_type: ColumnDataType) -> SchemaColumn {
        SchemaColumn::new("amount", data_type)
    }

    #[test]
    fn base_types_map_through_backend_tables() {
        assert_eq!(native_for_base(Backend::Snowflake, BaseType::String), "VARCHAR");
        assert_eq!(native_for_base(Backend::Snowflake, BaseType::Numeric), "NUMBER");
        assert_eq!(
            native_for_base(Backend::Snowflake, BaseType::Timestamp),
            "TIMESTAMP_LTZ"
        );
        assert_eq!(native_for_base(Backend::Bigquery, BaseType::Integer), "INT64");
        assert_eq!(native_for_base(Backend::Synapse, BaseType::Boolean), "BIT");
    }

    #[test]
    fn synonyms_fold_to_one_native_spelling() {
        assert!(native_types_equal(Backend::Snowflake, "text", "VARCHAR"));
        assert!(native_types_equal(Backend::Snowflake, "INTEGER", "NUMBER(38,0)"));
        assert!(native_types_equal(Backend::Bigquery, "boolean", "BOOL"));
        assert!(native_types_equal(Backend::Snowflake, "TIMESTAMP", "TIMESTAMP_NTZ"));
    }

    #[test]
    fn timestamp_variants_stay_distinct_natively() {
        assert!(!native_types_equal(
            Backend::Snowflake,
            "TIMESTAMP_LTZ",
            "TIMESTAMP_TZ"
        ));
        assert!(!native_types_equal(
            Backend::Snowflake,
            "TIMESTAMP_NTZ",
            "TIMESTAMP_LTZ"
        ));
        assert_eq!(canonicalize("TIMESTAMP_TZ", Backend::Snowflake), BaseType::Timestamp);
        assert_eq!(canonicalize("timestamp_ltz", Backend::Snowflake), BaseType::Timestamp);
    }

    #[test]
    fn canonicalize_reports_base_types() {
        assert_eq!(canonicalize("TEXT", Backend::Snowflake), BaseType::String);
        assert_eq!(canonicalize("INTEGER", Backend::Snowflake), BaseType::Numeric);
        assert_eq!(canonicalize("INTEGER", Backend::Bigquery), BaseType::Integer);
        assert_eq!(canonicalize("VARIANT", Backend::Snowflake), BaseType::String);
        assert_eq!(canonicalize("NUMERIC", Backend::Exasol), BaseType::Numeric);
    }

    #[test]
    fn backend_entry_overrides_base() {
        let data_type = ColumnDataType::new(DataTypeSpec::new("NUMERIC").with_default("0"))
            .with_backend(
                Backend::Snowflake,
                DataTypeSpec::new("NUMBER").with_length("38,2"),
            );
        let column = column_with(data_type);

        let snowflake = resolve_native_type(&column, Backend::Snowflake).unwrap();
        assert_eq!(snowflake.type_name, "NUMBER");
        assert_eq!(snowflake.length.as_deref(), Some("38,2"));
        assert_eq!(snowflake.default.as_deref(), Some("0"));

        let bigquery = resolve_native_type(&column, Backend::Bigquery).unwrap();
        assert_eq!(bigquery.type_name, "NUMERIC");
        assert_eq!(bigquery.length, None);
    }

    #[test]
    fn unknown_base_type_without_override_is_unsupported() {
        let column = column_with(ColumnDataType::new(DataTypeSpec::new("GEOMETRY")));
        let err = resolve_native_type(&column, Backend::Snowflake).expect_err("unsupported");
        assert!(matches!(err, OutputMappingError::UnsupportedType { .. }));
        assert_eq!(
            err.to_string(),
            "Base type \"GEOMETRY\" is not supported on backend \"snowflake\"."
        );
    }
}
