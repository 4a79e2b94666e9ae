use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Reconcile output table structures with Storage",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the structure changes each mapped table needs, without applying them
    Plan(PlanArgs),
    /// Reconcile each mapped table and write the resulting storage state
    Apply(ApplyArgs),
    /// Print the normalized form of one or more identifiers
    Normalize(NormalizeArgs),
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    /// Mapping file (YAML) with settings and table mappings
    #[arg(short, long)]
    pub mapping: PathBuf,
    /// Storage state file (JSON)
    #[arg(short, long)]
    pub state: PathBuf,
}

#[derive(Debug, Args)]
pub struct ApplyArgs {
    /// Mapping file (YAML) with settings and table mappings
    #[arg(short, long)]
    pub mapping: PathBuf,
    /// Storage state file (JSON); created when it does not exist
    #[arg(short, long)]
    pub state: PathBuf,
    /// Write the resulting state here instead of back to --state
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct NormalizeArgs {
    /// Identifiers to normalize
    #[arg(required = true)]
    pub names: Vec<String>,
    /// Maximum identifier length (defaults to 64)
    #[arg(long)]
    pub max_length: Option<usize>,
}
