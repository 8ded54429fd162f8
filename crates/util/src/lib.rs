use std::path::PathBuf;

use dirs_next::home_dir;

pub mod settings;

pub use settings::{EngineSettings, SettingsError, default_settings_path, seconds_to_duration};

/// Expands a leading `~` (either separator style) to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let trimmed = path.trim();
    let home = || home_dir().unwrap_or_else(|| PathBuf::from("~"));
    if trimmed == "~" {
        return home();
    }
    match trimmed.strip_prefix("~/").or_else(|| trimmed.strip_prefix("~\\")) {
        Some(rest) => home().join(rest),
        None => PathBuf::from(trimmed),
    }
}
