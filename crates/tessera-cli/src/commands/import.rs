//! Import command handler

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};

use tessera_core::{Atomicity, Store};

use crate::output::Output;

/// Import entities from a JSON lines file
pub fn import(store: &Store, path: &Path, output: &Output) -> Result<()> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut reader = BufReader::new(file);

    let result = store.import(&mut reader);
    if result.is_err() && store.backend().atomicity() == Atomicity::PerEntry {
        output.warn("The backend commits entries one by one; part of the import may be stored");
    }
    let count = result.with_context(|| format!("Failed to import {:?}", path))?;

    output.success(&format!("Imported {} entities from {}", count, path.display()));
    Ok(())
}
