//! Tessera CLI
//!
//! Command-line interface for inspecting and migrating Tessera entity stores.

use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tessera_core::{Config, Store};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Tessera - entity store and schema migration tooling")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show backend, schema and version counts
    Status,
    /// Show one entity at the current schema version
    Get {
        /// Entity reference
        reference: String,
        /// Show the entity exactly as stored, without migrating it
        #[arg(long)]
        raw: bool,
    },
    /// List entities
    #[command(alias = "ls")]
    List {
        /// Only show entities of this type
        #[arg(short = 't', long = "type")]
        entity_type: Option<String>,
    },
    /// Migrate every stored entity to its current version
    Migrate,
    /// Export entities as JSON lines
    Export {
        /// Downgrade entities to this schema version
        #[arg(long)]
        to_version: Option<String>,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Import entities from a JSON lines file
    Import {
        /// File produced by `tessera export`
        file: PathBuf,
    },
    /// Downgrade stored entities to an older schema version
    Rollback {
        /// Version to roll back to
        #[arg(long)]
        to_version: String,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, backend, namespace, write_back, page_size, schema_file, log_file)
        key: String,
        /// Configuration value
        value: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    // Config commands must work even when the store cannot be opened
    if let Commands::Config { command } = &cli.command {
        return match command.clone() {
            Some(ConfigCommands::Show) | None => commands::config::show(config_path, &output),
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(key, value, config_path, &output)
            }
        };
    }

    let config = Config::load_with_cli_override(config_path.map(PathBuf::as_path))
        .context("Failed to load configuration")?;
    init_logging(&config);

    let store = Store::open(config)?;

    match cli.command {
        Commands::Status => commands::status::show(&store, &output),
        Commands::Get { reference, raw } => commands::get::show(&store, &reference, raw, &output),
        Commands::List { entity_type } => {
            commands::list::list(&store, entity_type.as_deref(), &output)
        }
        Commands::Migrate => commands::migrate::migrate(&store, &output),
        Commands::Export {
            to_version,
            output: path,
        } => commands::export::export(&store, to_version, path, &output),
        Commands::Import { file } => commands::import::import(&store, &file, &output),
        Commands::Rollback { to_version } => {
            commands::rollback::rollback(&store, &to_version, &output)
        }
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

/// Initialize logging when TESSERA_LOG is set
///
/// Logs go to the configured log file, or stderr when none is set, so they
/// never mix with command output on stdout.
fn init_logging(config: &Config) {
    let Ok(log_level) = std::env::var("TESSERA_LOG") else {
        return;
    };

    let env_filter = if log_level.contains('=') {
        EnvFilter::new(log_level)
    } else {
        EnvFilter::new(format!(
            "tessera_core={},tessera_cli={}",
            log_level, log_level
        ))
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    match &config.log_file {
        Some(log_path) => {
            let log_file = match File::create(log_path) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("Warning: Could not create log file {:?}: {}", log_path, e);
                    return;
                }
            };
            // Ignore error if already initialized
            let _ = subscriber
                .with_ansi(false)
                .with_writer(log_file)
                .try_init();
            info!("Logging initialized to {:?}", log_path);
        }
        None => {
            let _ = subscriber.with_writer(std::io::stderr).try_init();
        }
    }
}
