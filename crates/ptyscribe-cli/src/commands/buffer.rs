//! Buffer command - print recent terminal output

use anyhow::{bail, Result};
use ptyscribe_core::buffer::read_session_context;
use ptyscribe_core::SessionResolver;
use std::path::PathBuf;
use tracing::debug;

pub async fn execute(
    log_file: Option<PathBuf>,
    session_id: Option<String>,
    lines: Option<usize>,
) -> Result<()> {
    let settings = crate::config::SettingsManager::load()?;
    let base = log_file.unwrap_or(settings.log_file.clone());
    let lines = lines.unwrap_or(settings.context_lines);

    let id = SessionResolver::from_env(session_id).resolve();
    debug!(session_id = %id, "Reading terminal buffer");

    match read_session_context(&base, Some(&id), lines)? {
        Some((path, content)) => {
            debug!(path = %path.display(), "Read terminal buffer");
            println!("{}", content);
            Ok(())
        }
        None => bail!("no terminal buffer available"),
    }
}
