//! Settings file and directory handling
//!
//! Settings live in `<config dir>/<program>/<program>.json`. That directory
//! is also the encoder's working directory, so `-report` logs, the
//! diagnostic log and `crashed/` all end up next to the settings file.

use super::schema::Settings;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Settings-related errors
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No configuration directory for this user")]
    NoConfigDir,
}

/// Directories derived from the program name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsPaths {
    pub settings_dir: PathBuf,
    pub settings_file: PathBuf,
    pub temp_dir: PathBuf,
}

impl SettingsPaths {
    /// Standard per-user locations
    pub fn resolve(program: &str) -> Result<Self, SettingsError> {
        let config_dir = dirs::config_dir().ok_or(SettingsError::NoConfigDir)?;
        Ok(Self::new(&config_dir.join(program), &std::env::temp_dir(), program))
    }

    pub fn new(settings_dir: &Path, temp_root: &Path, program: &str) -> Self {
        Self {
            settings_dir: settings_dir.to_path_buf(),
            settings_file: settings_dir.join(format!("{}.json", program)),
            temp_dir: temp_root.join(temp_dir_name(program)),
        }
    }
}

/// `<program>-<uid>`, unique per user on a shared temp directory
pub fn temp_dir_name(program: &str) -> String {
    format!("{}-{}", program, user_id())
}

#[cfg(unix)]
fn user_id() -> String {
    // SAFETY: getuid(2) cannot fail and touches no memory
    unsafe { libc::getuid() }.to_string()
}

#[cfg(not(unix))]
fn user_id() -> String {
    std::env::var("USERNAME").unwrap_or_else(|_| "user".to_string())
}

/// Read settings, writing defaults when the file does not exist yet.
///
/// A file that cannot be parsed is replaced by defaults.
pub fn load_settings(path: &Path) -> Result<Settings, SettingsError> {
    if !path.exists() {
        let settings = Settings::default();
        save_settings(&settings, path)?;
        tracing::info!("Wrote default settings to {:?}", path);
        return Ok(settings);
    }

    let content = fs::read_to_string(path)?;
    match serde_json::from_str::<Settings>(&content) {
        Ok(settings) => {
            tracing::debug!("Loaded settings from {:?}", path);
            Ok(settings)
        }
        Err(e) => {
            tracing::warn!("Settings file {:?} is unreadable ({}), using defaults", path, e);
            let settings = Settings::default();
            save_settings(&settings, path)?;
            Ok(settings)
        }
    }
}

/// Write settings as pretty JSON
pub fn save_settings(settings: &Settings, path: &Path) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(settings)?;
    fs::write(path, content)?;
    Ok(())
}
