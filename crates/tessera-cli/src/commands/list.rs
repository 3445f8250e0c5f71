//! List command handler

use anyhow::{Context, Result};

use tessera_core::{Flow, Store};

use crate::output::{Output, OutputFormat};

/// List entities, optionally filtered by type
///
/// Entities that cannot be read or migrated are reported and skipped; the
/// listing continues with the rest.
pub fn list(store: &Store, entity_type: Option<&str>, output: &Output) -> Result<()> {
    let mut shown = 0usize;
    let mut failed = 0usize;
    let mut print_error = None;

    store
        .iterate(&mut |item| {
            match item {
                Ok(doc) => {
                    if entity_type.map_or(true, |t| doc.entity_type == t) {
                        if let Err(e) = output.print_document_row(&doc) {
                            print_error = Some(e);
                            return Flow::Stop;
                        }
                        shown += 1;
                    }
                }
                Err(e) => {
                    failed += 1;
                    output.warn(&e.to_string());
                }
            }
            Flow::Continue
        })
        .context("Failed to enumerate entities")?;

    if let Some(e) = print_error {
        return Err(e);
    }

    if output.format == OutputFormat::Human {
        if shown == 0 {
            println!("No entities found.");
        } else {
            println!("\n{} entit{}", shown, if shown == 1 { "y" } else { "ies" });
        }
        if failed > 0 {
            println!("{} could not be read", failed);
        }
    }
    Ok(())
}
