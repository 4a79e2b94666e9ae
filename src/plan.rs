use anyhow::{Context, Result};
use log::info;

use crate::{
    cli::PlanArgs,
    config::MappingFile,
    preparer::{PlannedTable, StoragePreparer},
    storage_api::memory::InMemoryStorage,
    table,
};

pub fn execute(args: &PlanArgs) -> Result<()> {
    let mapping = MappingFile::load(&args.mapping)
        .with_context(|| format!("Loading mapping from {:?}", args.mapping))?;
    let storage = InMemoryStorage::load(&args.state)
        .with_context(|| format!("Loading storage state from {:?}", args.state))?;
    let plans = plan_tables(&storage, &mapping)?;
    let pending = plans.iter().filter(|p| !p.plan.is_noop()).count();
    print!("{}", table::render_plan(&plans));
    info!(
        "{} of {} table(s) need structure changes",
        pending,
        plans.len()
    );
    Ok(())
}

fn plan_tables(storage: &InMemoryStorage, mapping: &MappingFile) -> Result<Vec<PlannedTable>> {
    let preparer = StoragePreparer::new(storage, &mapping.settings);
    mapping
        .tables
        .iter()
        .map(|table| {
            preparer
                .plan(table)
                .with_context(|| format!("Planning table '{}'", table.destination))
        })
        .collect()
}
