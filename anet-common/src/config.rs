//! Configuration loading and root folder resolution

use crate::dictionary::Dictionary;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "ANET_ROOT_FOLDER";

/// Engine configuration read from `config.toml`
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Root folder holding the database (overridden by CLI and environment)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Default tracing level when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Database file name inside the root folder
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// EventBus channel capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Deployment dictionary
    #[serde(default)]
    pub dictionary: Dictionary,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_database_file() -> String {
    "anet.db".to_string()
}

fn default_event_bus_capacity() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            log_level: default_log_level(),
            database_file: default_database_file(),
            event_bus_capacity: default_event_bus_capacity(),
            dictionary: Dictionary::default(),
        }
    }
}

impl EngineConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.dictionary.validate()?;
        Ok(config)
    }

    /// Load configuration from an explicit path, or the platform config file
    /// when present, or defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match locate_config_file() {
                Ok(path) => path,
                Err(_) => return Ok(Self::default()),
            },
        };
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// Database path inside the resolved root folder
    pub fn database_path(&self, root_folder: &Path) -> PathBuf {
        root_folder.join(&self.database_file)
    }
}

/// Root folder resolution in priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(
    cli_arg: Option<&str>,
    env_var_name: &str,
    config: Option<&EngineConfig>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    if let Ok(path) = std::env::var(env_var_name) {
        return PathBuf::from(path);
    }

    if let Some(root_folder) = config.and_then(|c| c.root_folder.clone()) {
        return root_folder;
    }

    get_default_root_folder()
}

/// Get default configuration file path for the platform
fn locate_config_file() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("anet").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Ok(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/anet/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config("No config file found".to_string()))
}

/// Get OS-dependent default root folder path
fn get_default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("anet"))
        .unwrap_or_else(|| PathBuf::from("./anet_data"))
}
