//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use anyhow::Result;
use serde::Serialize;

use tessera_core::{Document, MigrationReport};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print any serializable value as pretty JSON
    pub fn print_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    /// Print a single document
    pub fn print_document(&self, doc: &Document) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                println!("Identity: {}", doc.identity);
                println!("Type:     {}", display_type(&doc.entity_type));
                println!("Version:  {}", doc.schema_version);

                if !doc.properties.is_empty() {
                    println!();
                    println!("── Properties ──");
                    for (name, value) in &doc.properties {
                        println!("  {}: {}", name, value);
                    }
                }
                if !doc.associations.is_empty() {
                    println!();
                    println!("── Associations ──");
                    for (name, target) in &doc.associations {
                        let target = target.as_ref().map_or("(none)", |r| r.as_str());
                        println!("  {} -> {}", name, target);
                    }
                }
                if !doc.many_associations.is_empty() {
                    println!();
                    println!("── Many-associations ──");
                    for (name, targets) in &doc.many_associations {
                        let ids: Vec<&str> = targets.iter().map(|r| r.as_str()).collect();
                        println!("  {} -> [{}]", name, ids.join(", "));
                    }
                }
            }
            OutputFormat::Json => {
                println!("{}", doc.to_json_pretty()?);
            }
            OutputFormat::Quiet => {
                println!("{}", doc.identity);
            }
        }
        Ok(())
    }

    /// Print one row of a document listing
    pub fn print_document_row(&self, doc: &Document) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                println!(
                    "{} | {} | {}",
                    truncate(doc.identity.as_str(), 36),
                    truncate(display_type(&doc.entity_type), 20),
                    doc.schema_version
                );
            }
            OutputFormat::Json => {
                println!("{}", doc.to_json()?);
            }
            OutputFormat::Quiet => {
                println!("{}", doc.identity);
            }
        }
        Ok(())
    }

    /// Print the outcome of a migrate or rollback pass
    pub fn print_report(&self, verb: &str, report: &MigrationReport) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                println!(
                    "{} {} of {} entities ({} already current, {} failed)",
                    verb, report.migrated, report.scanned, report.current, report.failed
                );
                for failure in &report.failures {
                    println!("  ✗ {}: {}", failure.reference, failure.error);
                }
            }
            OutputFormat::Json => self.print_json(report)?,
            OutputFormat::Quiet => {
                if report.failed > 0 {
                    println!("{}", report.failed);
                }
            }
        }
        Ok(())
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a warning to stderr (suppressed in quiet mode)
    pub fn warn(&self, message: &str) {
        if !self.is_quiet() {
            eprintln!("⚠ {}", message);
        }
    }
}

fn display_type(entity_type: &str) -> &str {
    if entity_type.is_empty() {
        "(untyped)"
    } else {
        entity_type
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    }
}
