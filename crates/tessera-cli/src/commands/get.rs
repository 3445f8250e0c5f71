//! Get command handler

use anyhow::{anyhow, Context, Result};

use tessera_core::{EntityReference, Store, StoreError};

use crate::output::Output;

/// Show a single entity
pub fn show(store: &Store, reference: &str, raw: bool, output: &Output) -> Result<()> {
    let reference = EntityReference::parse(reference).map_err(|e| anyhow!(e))?;

    let result = if raw {
        store.get_raw(&reference)
    } else {
        store.get(&reference)
    };

    let doc = match result {
        Ok(doc) => doc,
        Err(e) => {
            if let Some(hint) = e.recovery_suggestion() {
                output.warn(hint);
            }
            return Err(match e {
                StoreError::NotFound { .. } => anyhow!("Entity not found: {}", reference),
                other => anyhow::Error::new(other)
                    .context(format!("Failed to read entity {}", reference)),
            });
        }
    };

    output.print_document(&doc).context("Failed to print entity")
}
