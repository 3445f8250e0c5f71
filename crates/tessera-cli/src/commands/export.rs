//! Export command handler

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;

use tessera_core::{SchemaVersion, Store};

use crate::output::{Output, OutputFormat};

/// Export entities as JSON lines to a file or stdout
pub fn export(
    store: &Store,
    to_version: Option<String>,
    path: Option<PathBuf>,
    output: &Output,
) -> Result<()> {
    let version = to_version.map(SchemaVersion::new);
    let started = Utc::now();

    let report = match &path {
        Some(path) => {
            let file =
                File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
            let mut writer = BufWriter::new(file);
            let report = store.export(version.as_ref(), &mut writer);
            if report.is_err() {
                drop(writer);
                // An export cut short is not a usable import file
                let _ = fs::remove_file(path);
            }
            report
        }
        None => {
            let stdout = io::stdout();
            let mut writer = stdout.lock();
            let report = store.export(version.as_ref(), &mut writer);
            writer.flush().context("Failed to flush stdout")?;
            report
        }
    }
    .context("Export failed")?;

    // With no output file the entities themselves went to stdout
    let Some(path) = path else {
        if report.skipped > 0 {
            output.warn(&format!("{} entities could not be exported", report.skipped));
        }
        return Ok(());
    };

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "exported_at": started.to_rfc3339(),
                    "file": path,
                    "schema_version": version.as_ref().map(|v| v.to_string()),
                    "exported": report.exported,
                    "skipped": report.skipped,
                })
            );
        }
        OutputFormat::Quiet => {}
        OutputFormat::Human => {
            output.success(&format!(
                "Exported {} entities to {} at {}",
                report.exported,
                path.display(),
                started.format("%Y-%m-%d %H:%M:%S UTC")
            ));
            if report.skipped > 0 {
                output.warn(&format!("{} entities could not be exported", report.skipped));
            }
        }
    }
    Ok(())
}
