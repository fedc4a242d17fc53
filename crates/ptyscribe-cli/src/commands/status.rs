//! Status command - show the current session

use anyhow::Result;
use colored::Colorize;
use ptyscribe_core::{ProcessLock, Session, SessionResolver};
use std::path::PathBuf;

pub async fn execute(log_file: Option<PathBuf>, session_id: Option<String>) -> Result<()> {
    let settings = crate::config::SettingsManager::load()?;
    let base_log = log_file.unwrap_or(settings.log_file.clone());

    let id = SessionResolver::from_env(session_id).resolve();
    let session = Session::new(id, &base_log, &settings.lock_file);

    println!("{}", "ptyscribe session".blue().bold());
    println!();
    println!("   Session: {}", session.id.as_str().cyan());
    println!("   Log:     {}", describe(&session.log_path));
    println!("   Lock:    {}", session.lock_path.display());

    match ProcessLock::holder(&session.lock_path) {
        Some(pid) => println!("   {} Proxy running (pid {})", "✓".green(), pid),
        None => println!("   {} No proxy recording this session", "✗".red()),
    }

    Ok(())
}

fn describe(path: &std::path::Path) -> String {
    match std::fs::metadata(path) {
        Ok(meta) => format!("{} ({} bytes)", path.display(), meta.len()),
        Err(_) => format!("{} {}", path.display(), "(missing)".dimmed()),
    }
}
