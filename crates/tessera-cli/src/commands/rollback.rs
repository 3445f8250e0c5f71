//! Rollback command handler

use anyhow::{Context, Result};

use tessera_core::{SchemaVersion, Store};

use crate::output::Output;

/// Downgrade stored entities to an older version
pub fn rollback(store: &Store, to_version: &str, output: &Output) -> Result<()> {
    let version = SchemaVersion::new(to_version);
    let report = store
        .rollback(&version)
        .with_context(|| format!("Rollback to {} failed", version))?;
    output.print_report("Rolled back", &report)?;
    if report.migrated > 0 {
        output.warn(&rolled_back_notice(&version));
    }
    Ok(())
}

/// Reads always migrate; `write_back` only decides whether the upgraded form
/// is stored again
fn rolled_back_notice(version: &SchemaVersion) -> String {
    format!(
        "Entities now stamped {} are upgraded again on every read, and written back while write_back is enabled",
        version
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_describes_read_path() {
        let notice = rolled_back_notice(&SchemaVersion::new("v1"));

        assert!(notice.contains("stamped v1"));
        assert!(notice.contains("upgraded again on every read"));
        assert!(notice.contains("written back while write_back is enabled"));
        assert!(!notice.contains("unless"));
    }
}
