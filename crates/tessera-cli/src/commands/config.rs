//! Config command handlers

use std::path::PathBuf;

use anyhow::{Context, Result};

use tessera_core::Config;

use crate::output::{Output, OutputFormat};

fn load(config_path: Option<&PathBuf>) -> Result<Config> {
    Config::load_with_cli_override(config_path.map(PathBuf::as_path))
        .context("Failed to load configuration")
}

fn display_path(path: Option<&PathBuf>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "(not set)".to_string())
}

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config = load(config_path)?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "backend": config.backend.to_string(),
                    "namespace": config.namespace,
                    "write_back": config.write_back,
                    "page_size": config.page_size,
                    "schema_file": config.schema_file,
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:    {}", config.data_dir.display());
            println!("  backend:     {}", config.backend);
            println!("  namespace:   {}", config.namespace);
            println!("  write_back:  {}", config.write_back);
            println!("  page_size:   {}", config.page_size);
            println!("  schema_file: {}", display_path(config.schema_file.as_ref()));
            println!("  log_file:    {}", display_path(config.log_file.as_ref()));
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config = load(config_path)?;

    // "none" clears optional paths
    let value = if value == "none" { String::new() } else { value };
    config
        .set_value(&key, &value)
        .with_context(|| format!("Invalid value for {}", key))?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}
