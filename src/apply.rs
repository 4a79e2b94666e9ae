use std::path::Path;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::{
    backend::Backend,
    cli::ApplyArgs,
    config::MappingFile,
    preparer::StoragePreparer,
    snapshot::TableInfo,
    storage_api::memory::InMemoryStorage,
    table,
};

pub fn execute(args: &ApplyArgs) -> Result<()> {
    let mapping = MappingFile::load(&args.mapping)
        .with_context(|| format!("Loading mapping from {:?}", args.mapping))?;
    let storage = open_state(&args.state)?;
    let output = args.output.as_deref().unwrap_or(args.state.as_path());

    let preparer = StoragePreparer::new(&storage, &mapping.settings);
    let mut prepared = Vec::with_capacity(mapping.tables.len());
    for table in &mapping.tables {
        match preparer.prepare(table) {
            Ok(info) => {
                info!("Table '{}' is ready for output", info.id);
                prepared.push(info);
            }
            Err(err) => {
                // Mutations issued before the failure stay applied.
                warn!(
                    "Saving partially applied state to {:?} after a failure",
                    output
                );
                storage
                    .save(output)
                    .with_context(|| format!("Writing storage state to {output:?}"))?;
                return Err(err).with_context(|| format!("Preparing table '{}'", table.destination));
            }
        }
    }

    storage
        .save(output)
        .with_context(|| format!("Writing storage state to {output:?}"))?;
    print!("{}", render_prepared(&prepared));
    info!(
        "Prepared {} table(s); {} storage call(s) issued",
        prepared.len(),
        storage.calls().len()
    );
    Ok(())
}

fn open_state(path: &Path) -> Result<InMemoryStorage> {
    if path.exists() {
        InMemoryStorage::load(path)
            .with_context(|| format!("Loading storage state from {path:?}"))
    } else {
        info!("Storage state {path:?} does not exist, starting empty");
        Ok(InMemoryStorage::new(Backend::Snowflake))
    }
}

fn render_prepared(tables: &[TableInfo]) -> String {
    let headers = ["table", "typed", "columns", "primary key"]
        .iter()
        .map(|h| h.to_string())
        .collect::<Vec<_>>();
    let rows = tables
        .iter()
        .map(|info| {
            vec![
                info.id.clone(),
                info.is_typed.to_string(),
                info.columns.join(", "),
                info.primary_key.join(", "),
            ]
        })
        .collect::<Vec<_>>();
    table::render_table(&headers, &rows)
}
