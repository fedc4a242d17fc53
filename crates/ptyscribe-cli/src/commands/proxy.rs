//! Proxy command - record the current terminal

use anyhow::{Context, Result};
use ptyscribe_core::proxy::default_shell;
use ptyscribe_core::{Proxy, ProxyExit, ProxyOptions};
use std::path::PathBuf;
use tracing::info;

pub struct ProxyArgs {
    pub log_file: Option<PathBuf>,
    pub session_id: Option<String>,
    pub shell: Option<PathBuf>,
    pub args: Vec<String>,
}

pub async fn execute(args: ProxyArgs) -> Result<()> {
    let settings = crate::config::SettingsManager::load()?;
    let rotation = settings
        .rotation
        .to_config()
        .context("Invalid rotation settings")?;

    let options = ProxyOptions {
        shell: args.shell.unwrap_or_else(default_shell),
        shell_args: args.args,
        base_log: args.log_file.unwrap_or_else(|| settings.log_file.clone()),
        base_lock: settings.lock_file.clone(),
        session_override: args.session_id,
        rotation,
        stale_session_age: settings.stale_session_age(),
    };

    let proxy = Proxy::new(options);
    let exit = proxy.run().await.context("Proxy session failed")?;

    match exit {
        ProxyExit::Nested => info!("Proxy already active in this shell"),
        other => info!(exit = ?other, "Proxy finished"),
    }

    Ok(())
}
