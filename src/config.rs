//! Configuration file loading.
//!
//! `sqlshift.toml` in the working directory wins over
//! `<config_dir>/sqlshift/config.toml`. `SQLSHIFT_DIALECT` and
//! `SQLSHIFT_LOG_DIR` override whatever the file says.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ShiftError, ShiftResult};
use crate::options::PluginOptions;

pub const CONFIG_FILE: &str = "sqlshift.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Target dialect; unset means statements pass through untranslated.
    pub dialect: Option<String>,
    pub log_dir: Option<PathBuf>,
    pub options: PluginOptions,
}

impl Config {
    /// Load from the first config file found, then apply environment overrides.
    pub fn load() -> ShiftResult<Self> {
        let config = match Self::find() {
            Some(path) => Self::from_path(&path)?,
            None => Self::default(),
        };
        Ok(config.with_env())
    }

    /// The config file that [`Config::load`] would read.
    pub fn find() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join("sqlshift").join("config.toml"))
            .filter(|path| path.exists())
    }

    pub fn from_path(path: &Path) -> ShiftResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ShiftError::Config(format!("failed to read '{}': {}", path.display(), e))
        })?;
        Self::parse(&content)
            .map_err(|e| ShiftError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> ShiftResult<Self> {
        toml::from_str(content).map_err(|e| ShiftError::Config(e.to_string()))
    }

    /// Apply `SQLSHIFT_DIALECT` and `SQLSHIFT_LOG_DIR`.
    pub fn with_env(self) -> Self {
        self.with_overrides(
            std::env::var("SQLSHIFT_DIALECT").ok(),
            std::env::var("SQLSHIFT_LOG_DIR").ok(),
        )
    }

    fn with_overrides(mut self, dialect: Option<String>, log_dir: Option<String>) -> Self {
        if let Some(d) = dialect.filter(|d| !d.trim().is_empty()) {
            self.dialect = Some(d);
        }
        if let Some(dir) = log_dir.filter(|d| !d.trim().is_empty()) {
            self.log_dir = Some(PathBuf::from(dir));
        }
        self
    }

    /// Error log directory: configured, else `<data_local_dir>/sqlshift/logs`,
    /// else `./logs`.
    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .map(|dir| dir.join("sqlshift").join("logs"))
                .unwrap_or_else(|| PathBuf::from("logs"))
        })
    }
}
