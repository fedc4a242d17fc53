//! Configuration management

use anyhow::{Context, Result};
use ptyscribe_core::Settings;
use std::path::{Path, PathBuf};

/// Overrides the ptyscribe home directory
pub const HOME_ENV: &str = "PTYSCRIBE_HOME";

pub struct SettingsManager;

impl SettingsManager {
    /// Get the ptyscribe home directory (~/.ptyscribe)
    pub fn home() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(HOME_ENV) {
            return Ok(PathBuf::from(path));
        }
        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(home.join(".ptyscribe"))
    }

    /// Get the settings file path
    pub fn settings_path() -> Result<PathBuf> {
        Ok(Self::home()?.join("settings.json"))
    }

    /// Get the diagnostics log path used while proxying
    pub fn log_path() -> Result<PathBuf> {
        Ok(Self::home()?.join("ptyscribe.log"))
    }

    /// Load settings from disk, writing defaults on first use
    pub fn load() -> Result<Settings> {
        load_from(&Self::settings_path()?)
    }
}

fn load_from(path: &Path) -> Result<Settings> {
    if !path.exists() {
        let settings = Settings::default();
        save_to(path, &settings)?;
        return Ok(settings);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {:?}", path))?;

    serde_json::from_str(&content).with_context(|| format!("Failed to parse settings from {:?}", path))
}

fn save_to(path: &Path, settings: &Settings) -> Result<()> {
    // Ensure directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let content = serde_json::to_string_pretty(settings).context("Failed to serialize settings")?;

    std::fs::write(path, content).with_context(|| format!("Failed to write settings to {:?}", path))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_first_load_writes_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("settings.json");

        let settings = load_from(&path).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(path.exists());

        let reloaded = load_from(&path).unwrap();
        assert_eq!(reloaded, settings);
    }

    #[test]
    fn test_saved_values_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");

        let mut settings = Settings::default();
        settings.log_file = temp.path().join("shell.log");
        settings.rotation.max_size = "2MB".to_string();
        settings.context_lines = 20;
        save_to(&path, &settings).unwrap();

        let loaded = load_from(&path).unwrap();
        assert_eq!(loaded.log_file, temp.path().join("shell.log"));
        assert_eq!(loaded.rotation.to_config().unwrap().max_size, 2 * 1024 * 1024);
        assert_eq!(loaded.context_lines, 20);
    }

    #[test]
    fn test_malformed_settings_are_reported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse settings"));
    }
}
