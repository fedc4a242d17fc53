//! Rotate command - force a log rotation

use anyhow::{Context, Result};
use colored::Colorize;
use ptyscribe_core::Rotator;
use std::path::PathBuf;

pub async fn execute(log_file: Option<PathBuf>, debug: bool) -> Result<()> {
    let settings = crate::config::SettingsManager::load()?;
    let log_file = log_file.unwrap_or(settings.log_file.clone());
    let config = settings
        .rotation
        .to_config()
        .context("Invalid rotation settings")?;

    if debug {
        println!(
            "{} max_size={} max_backups={} max_age_days={} compress={}",
            "Rotation:".cyan(),
            config.max_size,
            config.max_backups,
            config.max_age_days,
            config.compress
        );
    }

    let rotator = Rotator::new(config);
    let rotated = rotator
        .force_rotate(&log_file)
        .with_context(|| format!("Failed to rotate {}", log_file.display()))?;

    if !rotated {
        println!(
            "{} Log file {} does not exist, nothing to rotate",
            "⚠️".yellow(),
            log_file.display()
        );
        return Ok(());
    }

    println!("{} Rotated {}", "✓".green(), log_file.display());

    let backups = rotator.backup_files(&log_file)?;
    println!("{} {} backup(s):", "Backups:".cyan(), backups.len());
    for backup in backups {
        println!("   {}", backup.display().to_string().dimmed());
    }

    Ok(())
}
