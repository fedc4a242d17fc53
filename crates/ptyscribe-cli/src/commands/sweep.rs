//! Sweep command - remove abandoned session logs

use anyhow::{Context, Result};
use colored::Colorize;
use ptyscribe_core::reaper;
use std::path::PathBuf;
use std::time::Duration;

pub async fn execute(log_file: Option<PathBuf>, max_age_hours: Option<u64>) -> Result<()> {
    let settings = crate::config::SettingsManager::load()?;
    let base_log = log_file.unwrap_or(settings.log_file.clone());
    let hours = max_age_hours.unwrap_or(settings.stale_session_hours);

    let report = reaper::sweep_inactive(
        &base_log,
        &settings.lock_file,
        Duration::from_secs(hours * 60 * 60),
    )
    .with_context(|| format!("Failed to sweep session logs of {}", base_log.display()))?;

    if report.removed.is_empty() {
        println!("{}", "No stale session logs".green());
    } else {
        println!("{} Removed {} stale session log(s):", "✓".green(), report.removed.len());
        for path in &report.removed {
            println!("   {}", path.display().to_string().dimmed());
        }
    }

    for path in &report.kept_active {
        println!("   {} {} (session still active)", "•".yellow(), path.display());
    }

    Ok(())
}
