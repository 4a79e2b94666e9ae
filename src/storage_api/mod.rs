//! Contract of the remote Storage API as seen by the reconciliation core.
//!
//! Calls are synchronous and issued one at a time. Implementations own
//! transport concerns (retries, timeouts, authentication); the core only
//! interprets the returned JSON and the [`ClientError`] status codes.

pub mod memory;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{backend::Backend, datatype::ResolvedDefinition};

pub const NOT_FOUND: u16 = 404;
pub const BAD_REQUEST: u16 = 400;

/// Failure reported by the Storage API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ClientError {
    pub message: String,
    pub code: u16,
}

impl ClientError {
    pub fn new(message: impl Into<String>, code: u16) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(message, NOT_FOUND)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(message, BAD_REQUEST)
    }

    pub fn is_not_found(&self) -> bool {
        self.code == NOT_FOUND
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Definition sent with an "add column" call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnSpec {
    /// Untyped tables only know column names.
    Untyped,
    Typed {
        definition: ResolvedDefinition,
        basetype: Option<String>,
    },
}

/// Attributes of an existing column to change; `None` leaves one untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColumnAttributeChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ColumnAttributeChanges {
    pub fn is_empty(&self) -> bool {
        self.length.is_none() && self.nullable.is_none() && self.default.is_none()
    }

    /// `length=20, nullable=false` style summary of the set attributes.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(length) = &self.length {
            parts.push(format!("length={length}"));
        }
        if let Some(nullable) = self.nullable {
            parts.push(format!("nullable={nullable}"));
        }
        if let Some(default) = &self.default {
            parts.push(format!("default={default}"));
        }
        parts.join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDefinitionColumn {
    pub name: String,
    pub definition: ResolvedDefinition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basetype: Option<String>,
}

/// Payload of a typed "create table definition" call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDefinition {
    pub name: String,
    pub primary_keys_names: Vec<String>,
    pub columns: Vec<TableDefinitionColumn>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteOperator {
    #[default]
    Eq,
    Ne,
}

impl DeleteOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeleteOperator::Eq => "eq",
            DeleteOperator::Ne => "ne",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFilter {
    pub column: String,
    pub operator: DeleteOperator,
    pub values: Vec<String>,
}

pub type Metadata = BTreeMap<String, String>;

pub trait StorageApi {
    /// Table detail JSON; 404 when the table does not exist.
    fn get_table(&self, table_id: &str) -> ClientResult<Value>;

    /// Bucket detail JSON; 404 when the bucket does not exist.
    fn get_bucket(&self, bucket_id: &str) -> ClientResult<Value>;

    fn create_bucket(&self, stage: &str, name: &str, backend: Option<Backend>)
    -> ClientResult<Value>;

    fn set_bucket_metadata(
        &self,
        bucket_id: &str,
        provider: &str,
        metadata: &Metadata,
    ) -> ClientResult<()>;

    fn create_table_definition(
        &self,
        bucket_id: &str,
        definition: &TableDefinition,
    ) -> ClientResult<String>;

    fn create_table(
        &self,
        bucket_id: &str,
        name: &str,
        columns: &[String],
        primary_key: &[String],
    ) -> ClientResult<String>;

    fn set_table_metadata(
        &self,
        table_id: &str,
        provider: &str,
        metadata: &Metadata,
    ) -> ClientResult<()>;

    fn add_table_column(&self, table_id: &str, name: &str, spec: &ColumnSpec) -> ClientResult<()>;

    fn update_table_column(
        &self,
        table_id: &str,
        name: &str,
        changes: &ColumnAttributeChanges,
    ) -> ClientResult<()>;

    /// Replace the primary key; an empty list drops it.
    fn set_table_primary_key(&self, table_id: &str, columns: &[String]) -> ClientResult<()>;

    fn set_column_metadata(
        &self,
        table_id: &str,
        column: &str,
        provider: &str,
        metadata: &Metadata,
    ) -> ClientResult<()>;

    fn delete_table_rows(&self, table_id: &str, filter: &DeleteFilter) -> ClientResult<()>;
}
