//! Config file: `<config dir>/tonegrid/config.toml`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tonegrid_core::{ConfigError, SequencerConfig};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("Config file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config file parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] ConfigError),
}

/// Output rendering settings for the in-process engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub sample_rate: u32,
    /// Frames rendered per engine block
    pub block_size: usize,
    /// How far ahead of the audible position transport callbacks fire
    pub lookahead_secs: f64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            block_size: 512,
            lookahead_secs: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub sequencer: SequencerConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tonegrid")
        .join("config.toml")
}

/// Parse and validate a config document. Missing keys take their defaults.
pub fn from_toml_str(s: &str) -> Result<AppConfig, ConfigFileError> {
    let config: AppConfig = toml::from_str(s)?;
    config.sequencer.validate()?;
    Ok(config)
}

pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigFileError> {
    let s = std::fs::read_to_string(path)?;
    from_toml_str(&s)
}

/// Load the user's config, falling back to defaults when the file is
/// missing or unusable
pub fn load_config() -> AppConfig {
    let path = config_path();
    if !path.exists() {
        return AppConfig::default();
    }
    match load_config_from(&path) {
        Ok(config) => {
            info!(path = %path.display(), "Loaded config");
            config
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unusable config file");
            AppConfig::default()
        }
    }
}

pub fn save_config_to(path: &Path, config: &AppConfig) -> Result<(), ConfigFileError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let s = toml::to_string_pretty(config)?;
    std::fs::write(path, s)?;
    Ok(())
}

pub fn save_config(config: &AppConfig) -> Result<(), ConfigFileError> {
    save_config_to(&config_path(), config)
}
