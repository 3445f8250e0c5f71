//! Migrate command handler

use anyhow::{Context, Result};

use tessera_core::Store;

use crate::output::Output;

/// Migrate every stored entity to its current version
pub fn migrate(store: &Store, output: &Output) -> Result<()> {
    let report = store.migrate_all().context("Migration pass failed")?;
    output.print_report("Migrated", &report)
}
