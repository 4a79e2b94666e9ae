pub mod apply;
pub mod backend;
pub mod changes;
pub mod cli;
pub mod config;
pub mod creator;
pub mod datatype;
pub mod error;
pub mod identifier;
pub mod legacy_modifier;
pub mod modifier;
pub mod plan;
pub mod preparer;
pub mod schema;
pub mod snapshot;
pub mod storage_api;
pub mod table;
pub mod validator;

use std::{env, sync::OnceLock};

use anyhow::Result;
use clap::Parser;
use log::{LevelFilter, debug};

use crate::cli::{Cli, Commands};

pub use crate::{
    changes::{PrimaryKeyChange, TableChangesStore},
    error::{OutputMappingError, StructureViolation, StructureViolations, ViolationKind},
    schema::SchemaColumn,
    snapshot::{BucketInfo, TableInfo, TableSnapshot},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("output_mapping", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Plan(args) => plan::execute(&args),
        Commands::Apply(args) => apply::execute(&args),
        Commands::Normalize(args) => handle_normalize(&args),
    }
}

fn handle_normalize(args: &cli::NormalizeArgs) -> Result<()> {
    let max_length = args
        .max_length
        .unwrap_or(backend::DEFAULT_MAX_IDENTIFIER_LENGTH);
    debug!("Normalizing {} identifier(s) to at most {max_length} characters", args.names.len());
    for name in &args.names {
        println!("{}", identifier::normalize_with_limit(name, max_length));
    }
    Ok(())
}
