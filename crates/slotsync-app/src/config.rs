//! Application configuration file.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use slotsync_core::{PcmFormat, SyncConfig};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.json";

/// Settings for a loopback run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Slot pool shape shared by both pipelines.
    pub sync: SyncConfig,
    /// PCM format used for capture and playback.
    pub format: PcmFormat,
    /// How long to loop audio before closing.
    pub duration_secs: u64,
    /// Input device name; the host default when absent.
    pub input_device: Option<String>,
    /// Output device name; the host default when absent.
    pub output_device: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            format: PcmFormat::default(),
            duration_secs: 10,
            input_device: None,
            output_device: None,
        }
    }
}

impl AppConfig {
    /// Platform config file location, e.g. `~/.config/slotsync/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "slotsync", "slotsync")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Load from `path`, or from the default location when `path` is `None`.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_json_str(&json).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.sync.validate()?;
        config.format.validate()?;
        Ok(config)
    }
}
