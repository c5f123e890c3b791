use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::input::detector::MAX_CHORD_LEN;

const DEFAULT_CONFIG: &str = r#"[telemetry]
enabled = true
log_path = "~/.hotkey-bindings/hotkeys.log"

[storage]
path = "~/.hotkey-bindings/bindings.json"

[detector]
max_chord_len = 4
"#;

/// Top-level configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Logging
    pub telemetry: TelemetryConfig,
    /// Binding persistence
    #[serde(default)]
    pub storage: StorageConfig,
    /// Chord preview
    #[serde(default)]
    pub detector: DetectorConfig,
}

/// Logging settings
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    /// Log to file instead of stdout
    pub enabled: bool,
    /// Log file path (`~/` is expanded)
    pub log_path: String,
}

/// Binding persistence settings
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// JSON store path (`~/` is expanded)
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "~/.hotkey-bindings/bindings.json".to_owned(),
        }
    }
}

/// Chord detector settings
#[derive(Debug, Deserialize, Clone)]
pub struct DetectorConfig {
    /// Snapshots with more keys are ignored
    pub max_chord_len: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            max_chord_len: MAX_CHORD_LEN,
        }
    }
}

impl Config {
    /// Load config from ~/.hotkey-bindings.toml, creating it if missing
    ///
    /// # Errors
    /// Returns error if HOME is unset or the file cannot be read, written or parsed
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default(&config_path).context("failed to create default config")?;
        }

        Self::load_from(&config_path)
    }

    /// Load config from an explicit path
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).context("failed to read config file")?;
        Self::parse(&contents)
    }

    fn parse(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).context("failed to parse config TOML")?;
        Ok(config)
    }

    fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join(".hotkey-bindings.toml"))
    }

    fn create_default(path: &Path) -> Result<()> {
        fs::write(path, DEFAULT_CONFIG).context("failed to write default config")?;
        Ok(())
    }

    /// Expand ~ in paths to home directory
    ///
    /// # Errors
    /// Returns error if the path starts with `~/` and HOME is unset
    pub fn expand_path(path: &str) -> Result<PathBuf> {
        if let Some(stripped) = path.strip_prefix("~/") {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            Ok(PathBuf::from(home).join(stripped))
        } else {
            Ok(PathBuf::from(path))
        }
    }
}
