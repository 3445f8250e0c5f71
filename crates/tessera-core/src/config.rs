//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/tessera/config.toml)
//! 3. Environment variables (TESSERA_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable prefix
const ENV_PREFIX: &str = "TESSERA";

/// Storage backend selected at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    File,
    #[default]
    Sqlite,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "file" => Ok(BackendKind::File),
            "sqlite" => Ok(BackendKind::Sqlite),
            other => bail!("Unknown backend '{}' (expected memory, file or sqlite)", other),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Memory => f.write_str("memory"),
            BackendKind::File => f.write_str("file"),
            BackendKind::Sqlite => f.write_str("sqlite"),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for data storage (entity files, SQLite db)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub backend: BackendKind,

    /// Names the entity directory (file backend) or database (sqlite backend)
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Persist documents migrated on read
    #[serde(default = "default_true")]
    pub write_back: bool,

    /// Rows fetched per query while iterating the sqlite backend
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// TOML file declaring entity types and migration steps
    #[serde(default)]
    pub schema_file: Option<PathBuf>,

    /// Write logs here instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backend: BackendKind::default(),
            namespace: default_namespace(),
            write_back: true,
            page_size: default_page_size(),
            schema_file: None,
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (TESSERA_DATA_DIR, TESSERA_BACKEND, TESSERA_WRITE_BACK)
    /// 2. Config file (~/.config/tessera/config.toml or TESSERA_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load from `--config` when given, otherwise from the default location
    pub fn load_with_cli_override(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        // TESSERA_DATA_DIR
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // TESSERA_BACKEND
        if let Ok(val) = std::env::var(format!("{}_BACKEND", ENV_PREFIX)) {
            self.backend = val
                .parse()
                .with_context(|| format!("Invalid {}_BACKEND", ENV_PREFIX))?;
        }

        // TESSERA_WRITE_BACK
        if let Ok(val) = std::env::var(format!("{}_WRITE_BACK", ENV_PREFIX)) {
            self.write_back = val.eq_ignore_ascii_case("true") || val == "1";
        }

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            bail!("page_size must be at least 1");
        }
        if self.namespace.trim().is_empty() {
            bail!("namespace must not be empty");
        }
        Ok(())
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if self.backend != BackendKind::Memory && !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Set one value by key, as used by `tessera config set`
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let optional_path = |v: &str| {
            if v.is_empty() {
                None
            } else {
                Some(PathBuf::from(v))
            }
        };
        match key {
            "data_dir" => self.data_dir = PathBuf::from(value),
            "backend" => self.backend = value.parse()?,
            "namespace" => self.namespace = value.to_string(),
            "write_back" => {
                self.write_back = value
                    .parse()
                    .with_context(|| format!("write_back expects true or false, got '{}'", value))?
            }
            "page_size" => {
                self.page_size = value
                    .parse()
                    .with_context(|| format!("page_size expects a number, got '{}'", value))?
            }
            "schema_file" => self.schema_file = optional_path(value),
            "log_file" => self.log_file = optional_path(value),
            other => bail!(
                "Unknown config key '{}'. Valid keys: data_dir, backend, namespace, write_back, page_size, schema_file, log_file",
                other
            ),
        }
        self.validate()
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with TESSERA_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tessera")
            .join("config.toml")
    }

    /// Directory holding one JSON file per entity
    pub fn entities_dir(&self) -> PathBuf {
        self.data_dir.join(&self.namespace)
    }

    /// Get the path to the SQLite database
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.db", self.namespace))
    }

    /// Schema file, resolved against the data directory when relative
    pub fn schema_path(&self) -> Option<PathBuf> {
        self.schema_file.as_ref().map(|path| {
            if path.is_absolute() {
                path.clone()
            } else {
                self.data_dir.join(path)
            }
        })
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tessera")
}

fn default_namespace() -> String {
    "tessera-data".to_string()
}

fn default_true() -> bool {
    true
}

fn default_page_size() -> usize {
    256
}
