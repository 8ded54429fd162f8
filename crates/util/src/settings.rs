//! Engine settings persistence.
//!
//! Settings live in a small JSON file under the standard configuration
//! directory (`~/.config/autoflow/settings.json` on most platforms). A missing
//! file yields defaults; a file that cannot be parsed is reported and ignored.
//! Individual values can be overridden through environment variables so CI
//! runs do not need a settings file at all.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dirs_next::config_dir;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::expand_tilde;

/// Environment variable allowing callers to override the settings file path.
pub const SETTINGS_PATH_ENV: &str = "AUTOFLOW_SETTINGS_PATH";

/// Environment variable overriding the pacing delay, in (fractional) seconds.
pub const PROCESSING_DELAY_ENV: &str = "AUTOFLOW_PROCESSING_DELAY";

/// Default filename for the JSON payload.
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Pause inserted after every actor when nothing else is configured.
pub const DEFAULT_PROCESSING_DELAY_SECS: f64 = 0.5;

/// Error surfaced when reading or writing settings fails.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// I/O failure (for example, permissions or missing directory).
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization failure while saving.
    #[error("settings serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persisted engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSettings {
    /// Pacing pause after each actor, in seconds.
    #[serde(default = "default_processing_delay_secs")]
    pub processing_delay_secs: f64,
    /// Tag filter applied when a run does not specify its own.
    #[serde(default)]
    pub default_tags: Vec<String>,
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    #[serde(default)]
    pub log_filter: Option<String>,
}

fn default_processing_delay_secs() -> f64 {
    DEFAULT_PROCESSING_DELAY_SECS
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            processing_delay_secs: DEFAULT_PROCESSING_DELAY_SECS,
            default_tags: Vec::new(),
            log_filter: None,
        }
    }
}

impl EngineSettings {
    /// Loads settings from the default location and applies environment overrides.
    pub fn load() -> Result<Self, SettingsError> {
        let mut settings = Self::load_from(&default_settings_path())?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Loads settings from `path` without consulting the environment.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        match fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(settings) => Ok(settings),
                Err(error) => {
                    warn!(
                        path = %path.display(),
                        error = %error,
                        "Failed to parse settings file; using defaults"
                    );
                    Ok(Self::default())
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(error) => Err(SettingsError::Io(error)),
        }
    }

    /// Writes the settings as pretty JSON, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }

    /// Applies `AUTOFLOW_PROCESSING_DELAY` when it holds a parseable number.
    pub fn apply_env_overrides(&mut self) {
        let Ok(raw) = env::var(PROCESSING_DELAY_ENV) else {
            return;
        };
        match raw.trim().parse::<f64>() {
            Ok(seconds) => self.processing_delay_secs = seconds,
            Err(error) => warn!(
                variable = PROCESSING_DELAY_ENV,
                value = %raw,
                error = %error,
                "Ignoring invalid processing delay override"
            ),
        }
    }

    /// Pacing delay as a [`Duration`]; negative or non-finite values become zero.
    pub fn processing_delay(&self) -> Duration {
        seconds_to_duration(self.processing_delay_secs)
    }
}

/// Converts fractional seconds into a [`Duration`], clamping invalid input to zero.
pub fn seconds_to_duration(seconds: f64) -> Duration {
    if seconds.is_finite() && seconds > 0.0 {
        Duration::from_secs_f64(seconds)
    } else {
        Duration::ZERO
    }
}

/// Resolves the settings path, honouring [`SETTINGS_PATH_ENV`].
pub fn default_settings_path() -> PathBuf {
    if let Ok(path) = env::var(SETTINGS_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return expand_tilde(trimmed);
        }
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("autoflow")
        .join(SETTINGS_FILE_NAME)
}
