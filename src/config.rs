use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::validation::DEFAULT_MIN_COMPONENT_DESCRIPTION_LEN;

const APP_NAME: &str = "specgraph";
const CONFIG_FILE: &str = "config.json";

/// Overrides the database location from the config file.
pub const DB_ENV_VAR: &str = "SPECGRAPH_DB";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite database. `None` uses the platform data directory.
    pub database_path: Option<PathBuf>,
    /// Components with shorter descriptions get a validation warning.
    pub min_component_description_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            min_component_description_len: DEFAULT_MIN_COMPONENT_DESCRIPTION_LEN,
        }
    }
}

impl Config {
    /// Load configuration from the user's config directory, then apply
    /// environment overrides.
    /// Returns default config if file doesn't exist or fails to parse.
    pub fn load() -> Self {
        let config = match get_config_path().and_then(|path| Self::load_from(&path)) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config, using defaults: {:#}", e);
                Self::default()
            }
        };
        config.with_env_overrides()
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("Failed to read config file")?;

        let config = serde_json::from_str(&content).context("Failed to parse config file")?;

        Ok(config)
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(path) = std::env::var_os(DB_ENV_VAR).filter(|v| !v.is_empty()) {
            self.database_path = Some(PathBuf::from(path));
        }
        self
    }

    /// Save the current configuration to disk.
    pub fn save(&self) -> Result<()> {
        self.save_to(&get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }
}

pub fn get_config_path() -> Result<PathBuf> {
    let mut path =
        config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    path.push(APP_NAME);
    path.push(CONFIG_FILE);
    Ok(path)
}
