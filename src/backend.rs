use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::OutputMappingError;

pub const DEFAULT_MAX_IDENTIFIER_LENGTH: usize = 64;

/// Storage backend owning a bucket. Column types are resolved per backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Snowflake,
    Bigquery,
    Synapse,
    Exasol,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Snowflake => "snowflake",
            Backend::Bigquery => "bigquery",
            Backend::Synapse => "synapse",
            Backend::Exasol => "exasol",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &["snowflake", "bigquery", "synapse", "exasol"]
    }

    pub fn max_identifier_length(&self) -> usize {
        match self {
            Backend::Bigquery => 300,
            Backend::Synapse => 128,
            Backend::Snowflake | Backend::Exasol => DEFAULT_MAX_IDENTIFIER_LENGTH,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = OutputMappingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "snowflake" => Ok(Backend::Snowflake),
            "bigquery" => Ok(Backend::Bigquery),
            "synapse" => Ok(Backend::Synapse),
            "exasol" => Ok(Backend::Exasol),
            _ => Err(OutputMappingError::UnsupportedBackend(value.to_string())),
        }
    }
}
