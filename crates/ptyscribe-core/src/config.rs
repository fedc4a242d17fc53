//! Configuration for rotation and the proxy

use crate::error::{Result, ScribeError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default base path of the proxy's session logs
pub const DEFAULT_LOG_FILE: &str = "/tmp/ptyscribe_proxy.log";

/// Default base path of the proxy's session locks
pub const DEFAULT_LOCK_FILE: &str = "/tmp/ptyscribe-proxy.lock";

/// Rotation thresholds for a single log file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotateConfig {
    /// Size in bytes at which the live file is rotated
    pub max_size: u64,
    /// Number of backups kept after pruning
    pub max_backups: usize,
    /// Gzip backups after renaming them
    pub compress: bool,
    /// Backups older than this many days are removed
    pub max_age_days: u32,
}

impl Default for RotateConfig {
    fn default() -> Self {
        Self {
            max_size: 10 * 1024 * 1024,
            max_backups: 5,
            compress: true,
            max_age_days: 30,
        }
    }
}

impl RotateConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(u64::from(self.max_age_days) * 24 * 60 * 60)
    }
}

/// Persisted user settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub version: String,
    /// Base log path; each session gets `<stem>.<id><ext>` next to it
    pub log_file: PathBuf,
    /// Base lock path, derived per session like `log_file`
    pub lock_file: PathBuf,
    pub rotation: RotationSettings,
    /// Session logs untouched for longer than this are reaped at proxy start
    pub stale_session_hours: u64,
    /// Lines returned by the `buffer` command
    pub context_lines: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            lock_file: PathBuf::from(DEFAULT_LOCK_FILE),
            rotation: RotationSettings::default(),
            stale_session_hours: 24,
            context_lines: 50,
        }
    }
}

impl Settings {
    pub fn stale_session_age(&self) -> Duration {
        Duration::from_secs(self.stale_session_hours * 60 * 60)
    }
}

/// Rotation settings as written in `settings.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationSettings {
    /// Human readable threshold, e.g. `"5MB"`
    pub max_size: String,
    pub max_backups: usize,
    pub max_age_days: u32,
    pub compress: bool,
}

impl Default for RotationSettings {
    // The proxy rotates more aggressively than the library default.
    fn default() -> Self {
        Self {
            max_size: "5MB".to_string(),
            max_backups: 3,
            max_age_days: 7,
            compress: true,
        }
    }
}

impl RotationSettings {
    pub fn to_config(&self) -> Result<RotateConfig> {
        let max_size = parse_size(&self.max_size)?;
        if max_size == 0 {
            return Err(ScribeError::Config(
                "rotation.max_size must be greater than zero".to_string(),
            ));
        }

        Ok(RotateConfig {
            max_size,
            max_backups: self.max_backups,
            compress: self.compress,
            max_age_days: self.max_age_days,
        })
    }
}

/// Parse size strings like "10MB", "1GB", "500KB" or a bare byte count
pub fn parse_size(input: &str) -> Result<u64> {
    let normalized = input.trim().to_ascii_uppercase();

    let (digits, multiplier) = if let Some(n) = normalized.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = normalized.strip_suffix("MB") {
        (n, 1024 * 1024)
    } else if let Some(n) = normalized.strip_suffix("GB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = normalized.strip_suffix('B') {
        (n, 1)
    } else {
        (normalized.as_str(), 1)
    };

    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| ScribeError::InvalidSize(input.to_string()))?;

    value
        .checked_mul(multiplier)
        .ok_or_else(|| ScribeError::InvalidSize(input.to_string()))
}
