//! Creation of destination buckets and tables.

use std::sync::LazyLock;

use log::{debug, info};
use regex::Regex;

use crate::{
    backend::Backend,
    config::OutputMappingSettings,
    datatype,
    error::{OutputMappingError, Result},
    schema::{self, SchemaColumn},
    snapshot::BucketInfo,
    storage_api::{Metadata, StorageApi, TableDefinition, TableDefinitionColumn},
};

pub const SYSTEM_PROVIDER: &str = "system";
pub const BRANCH_ID_KEY: &str = "KBC.createdBy.branch.id";
pub const COMPONENT_ID_KEY: &str = "KBC.createdBy.component.id";
pub const CONFIGURATION_ID_KEY: &str = "KBC.createdBy.configuration.id";
pub const CONFIGURATION_ROW_ID_KEY: &str = "KBC.createdBy.configurationRow.id";

static DESTINATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<stage>in|out)\.c-(?P<bucket>[^.\s]+)\.(?P<table>[^.\s]+)$")
        .expect("DESTINATION_PATTERN regex should compile")
});

/// A parsed `stage.c-bucket.table` table id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub stage: String,
    pub bucket: String,
    pub table: String,
}

impl Destination {
    pub fn parse(value: &str) -> Result<Self> {
        let captures = DESTINATION_PATTERN.captures(value.trim()).ok_or_else(|| {
            OutputMappingError::invalid_output(format!(
                "Destination \"{value}\" is not a valid table id. Expected \"in|out.c-<bucket>.<table>\"."
            ))
        })?;
        Ok(Self {
            stage: captures["stage"].to_string(),
            bucket: captures["bucket"].to_string(),
            table: captures["table"].to_string(),
        })
    }

    pub fn bucket_id(&self) -> String {
        format!("{}.c-{}", self.stage, self.bucket)
    }

    pub fn table_id(&self) -> String {
        format!("{}.{}", self.bucket_id(), self.table)
    }
}

/// `KBC.createdBy.*` tags written to buckets created by a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemMetadata {
    pub component_id: String,
    pub configuration_id: Option<String>,
    pub configuration_row_id: Option<String>,
    pub branch_id: Option<String>,
}

impl From<&OutputMappingSettings> for SystemMetadata {
    fn from(settings: &OutputMappingSettings) -> Self {
        Self {
            component_id: settings.component_id.clone(),
            configuration_id: settings.configuration_id.clone(),
            configuration_row_id: settings.configuration_row_id.clone(),
            branch_id: settings.branch_id.clone(),
        }
    }
}

impl SystemMetadata {
    pub fn created_by(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert(COMPONENT_ID_KEY.to_string(), self.component_id.clone());
        let optional = [
            (CONFIGURATION_ID_KEY, &self.configuration_id),
            (CONFIGURATION_ROW_ID_KEY, &self.configuration_row_id),
            (BRANCH_ID_KEY, &self.branch_id),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                metadata.insert(key.to_string(), value.clone());
            }
        }
        metadata
    }
}

/// Typed-create payload for `schema` on `backend`, columns in schema order.
pub fn build_table_definition(
    name: &str,
    schema: &[SchemaColumn],
    backend: Backend,
) -> Result<TableDefinition> {
    let columns = schema
        .iter()
        .map(|column| {
            Ok(TableDefinitionColumn {
                name: column.name.clone(),
                definition: datatype::resolve_native_type(column, backend)?,
                basetype: Some(datatype::resolve_basetype(column, backend)),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(TableDefinition {
        name: name.to_string(),
        primary_keys_names: schema::primary_key_names(schema),
        columns,
    })
}

pub fn create_table_definition<S: StorageApi + ?Sized>(
    storage: &S,
    bucket_id: &str,
    definition: &TableDefinition,
) -> Result<String> {
    let table_id = storage
        .create_table_definition(bucket_id, definition)
        .map_err(|err| {
            OutputMappingError::remote(
                format!(
                    "Cannot create table \"{}\" definition in Storage API",
                    definition.name
                ),
                err,
            )
        })?;
    info!(
        "Created typed table '{table_id}' with {} column(s)",
        definition.columns.len()
    );
    Ok(table_id)
}

pub fn create_table<S: StorageApi + ?Sized>(
    storage: &S,
    bucket_id: &str,
    name: &str,
    columns: &[String],
    primary_key: &[String],
) -> Result<String> {
    let table_id = storage
        .create_table(bucket_id, name, columns, primary_key)
        .map_err(|err| {
            OutputMappingError::remote(format!("Cannot create table \"{name}\" in Storage API"), err)
        })?;
    info!(
        "Created table '{table_id}' with {} column(s)",
        columns.len()
    );
    Ok(table_id)
}

/// Return the destination bucket, creating and tagging it when absent.
///
/// A bucket tagged with another development branch cannot receive output.
pub fn ensure_destination_bucket<S: StorageApi + ?Sized>(
    storage: &S,
    destination: &Destination,
    system_metadata: &SystemMetadata,
) -> Result<BucketInfo> {
    let bucket_id = destination.bucket_id();
    match storage.get_bucket(&bucket_id) {
        Ok(value) => {
            let bucket = BucketInfo::from_json(&value)?;
            check_bucket_branch(&bucket, system_metadata)?;
            debug!("Using existing bucket '{bucket_id}'");
            Ok(bucket)
        }
        Err(err) if err.is_not_found() => {
            storage
                .create_bucket(&destination.stage, &destination.bucket, None)
                .map_err(|err| {
                    OutputMappingError::remote(
                        format!("Cannot create bucket \"{bucket_id}\" in Storage API"),
                        err,
                    )
                })?;
            storage
                .set_bucket_metadata(&bucket_id, SYSTEM_PROVIDER, &system_metadata.created_by())
                .map_err(|err| {
                    OutputMappingError::remote(
                        format!("Cannot set metadata of bucket \"{bucket_id}\" in Storage API"),
                        err,
                    )
                })?;
            info!("Created bucket '{bucket_id}'");
            let value = storage
                .get_bucket(&bucket_id)
                .map_err(OutputMappingError::passthrough)?;
            BucketInfo::from_json(&value)
        }
        Err(err) => Err(OutputMappingError::remote(
            format!("Cannot load bucket \"{bucket_id}\" from Storage API"),
            err,
        )),
    }
}

fn check_bucket_branch(bucket: &BucketInfo, system_metadata: &SystemMetadata) -> Result<()> {
    let (Some(owner), Some(caller)) = (
        bucket.metadata_value(BRANCH_ID_KEY),
        system_metadata.branch_id.as_deref(),
    ) else {
        return Ok(());
    };
    if owner == caller {
        return Ok(());
    }
    Err(OutputMappingError::invalid_output(format!(
        "Trying to store output in bucket \"{}\" owned by branch \"{owner}\", but the job runs on branch \"{caller}\".",
        bucket.id
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDataType, DataTypeSpec};

    #[test]
    fn destination_parses_stage_bucket_and_table() {
        let destination = Destination::parse("out.c-reports.daily").expect("destination");
        assert_eq!(destination.stage, "out");
        assert_eq!(destination.bucket, "reports");
        assert_eq!(destination.bucket_id(), "out.c-reports");
        assert_eq!(destination.table_id(), "out.c-reports.daily");
    }

    #[test]
    fn malformed_destinations_are_rejected() {
        for value in ["reports.daily", "tmp.c-a.b", "out.c-a", "out.c-a.b.c"] {
            assert!(Destination::parse(value).is_err(), "{value} should fail");
        }
    }

    #[test]
    fn created_by_skips_missing_ids() {
        let metadata = SystemMetadata {
            component_id: "keboola.ex-db".to_string(),
            configuration_id: Some("123".to_string()),
            configuration_row_id: None,
            branch_id: None,
        }
        .created_by();
        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata.get(CONFIGURATION_ID_KEY).map(String::as_str), Some("123"));
    }

    #[test]
    fn table_definition_resolves_types_and_primary_key() {
        let schema = vec![
            SchemaColumn::new("id", ColumnDataType::new(DataTypeSpec::new("INTEGER")))
                .with_primary_key(true)
                .with_nullable(false),
            SchemaColumn::new("label", ColumnDataType::new(DataTypeSpec::new("STRING"))),
        ];
        let definition = build_table_definition("items", &schema, Backend::Bigquery).expect("definition");
        assert_eq!(definition.primary_keys_names, vec!["id"]);
        assert_eq!(definition.columns[0].definition.type_name, "INT64");
        assert!(!definition.columns[0].definition.nullable);
        assert_eq!(definition.columns[1].definition.type_name, "STRING");
    }
}
