//! Connection configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/livesync/config.toml)
//! 3. Environment variables (LIVESYNC_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::instance::IdProp;

/// Environment variable prefix
const ENV_PREFIX: &str = "LIVESYNC";

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Property carrying each record's identity
    #[serde(default = "default_id_prop")]
    pub id_prop: String,

    /// Query parameter holding the sort clause
    #[serde(default = "default_sort_param")]
    pub sort_param: String,

    /// Query parameters that page results and never filter them
    #[serde(default = "default_paging_params")]
    pub paging_params: Vec<String>,

    /// Log file for the CLI (stderr when unset)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id_prop: default_id_prop(),
            sort_param: default_sort_param(),
            paging_params: default_paging_params(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (LIVESYNC_ID_PROP, LIVESYNC_SORT_PARAM, LIVESYNC_LOG_FILE)
    /// 2. Config file (~/.config/livesync/config.toml or LIVESYNC_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from an explicit path, or the default location
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
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

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // LIVESYNC_ID_PROP
        if let Ok(val) = std::env::var(format!("{}_ID_PROP", ENV_PREFIX)) {
            if !val.is_empty() {
                self.id_prop = val;
            }
        }

        // LIVESYNC_SORT_PARAM
        if let Ok(val) = std::env::var(format!("{}_SORT_PARAM", ENV_PREFIX)) {
            if !val.is_empty() {
                self.sort_param = val;
            }
        }

        // LIVESYNC_LOG_FILE
        if let Ok(val) = std::env::var(format!("{}_LOG_FILE", ENV_PREFIX)) {
            self.log_file = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }
    }

    /// Save configuration to a file
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with LIVESYNC_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("livesync")
            .join("config.toml")
    }

    /// The identity property as used by the store
    pub fn id_prop(&self) -> IdProp {
        IdProp::new(&self.id_prop)
    }
}

fn default_id_prop() -> String {
    "id".to_string()
}

fn default_sort_param() -> String {
    "sort".to_string()
}

fn default_paging_params() -> Vec<String> {
    ["start", "end", "limit", "offset"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
