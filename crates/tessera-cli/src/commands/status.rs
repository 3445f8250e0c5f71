//! Status command handler

use anyhow::{Context, Result};

use tessera_core::Store;

use crate::output::{Output, OutputFormat};

/// Show status information
pub fn show(store: &Store, output: &Output) -> Result<()> {
    let stats = store.stats().context("Failed to scan entities")?;
    let config = store.config();
    let registry = store.registry();
    let ladder = store.engine().ladder();

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "backend": stats.backend,
                    "atomicity": stats.atomicity,
                    "data_dir": config.data_dir,
                    "namespace": config.namespace,
                    "write_back": config.write_back,
                    "schema": {
                        "file": config.schema_path(),
                        "entity_types": registry.len(),
                        "migration_steps": ladder.len(),
                        "latest_version": ladder.max_version().map(|v| v.to_string()),
                    },
                    "counts": {
                        "total": stats.total,
                        "unreadable": stats.unreadable,
                        "behind": stats.behind,
                        "ahead": stats.ahead,
                        "by_type": stats.by_type,
                        "by_version": stats.by_version,
                    }
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", stats.total);
        }
        OutputFormat::Human => {
            println!("Tessera Status");
            println!("==============");
            println!();
            println!("Storage:");
            println!("  Backend:    {} ({} atomicity)", stats.backend, stats.atomicity);
            println!("  Location:   {}", config.data_dir.display());
            println!("  Namespace:  {}", config.namespace);
            println!(
                "  Write-back: {}",
                if config.write_back { "enabled" } else { "disabled" }
            );
            println!();
            println!("Schema:");
            match config.schema_path() {
                Some(path) => println!("  File:   {}", path.display()),
                None => println!("  File:   (not set)"),
            }
            println!("  Types:  {}", registry.len());
            println!("  Steps:  {}", ladder.len());
            if let Some(latest) = ladder.max_version() {
                println!("  Latest: {}", latest);
            }
            println!();
            println!("Contents:");
            println!("  Entities: {}", stats.total);
            for (entity_type, count) in &stats.by_type {
                let name = if entity_type.is_empty() { "(untyped)" } else { entity_type.as_str() };
                println!("    {}: {}", name, count);
            }
            println!("  Versions:");
            for (version, count) in &stats.by_version {
                println!("    {}: {}", version, count);
            }
            if stats.behind > 0 {
                println!();
                println!(
                    "{} entities are behind their schema version. Run `tessera migrate` to upgrade them.",
                    stats.behind
                );
            }
            if stats.unreadable > 0 {
                output.warn(&format!(
                    "{} stored entries could not be parsed and are skipped by migrate and export",
                    stats.unreadable
                ));
            }
            if stats.ahead > 0 {
                output.warn(&format!(
                    "{} entities were written by a newer release and cannot be read",
                    stats.ahead
                ));
            }
        }
    }

    Ok(())
}
