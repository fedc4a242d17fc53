//! ptyscribe CLI
//!
//! Records interactive shell sessions through a PTY proxy and manages the
//! resulting session logs.

mod commands;
mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use ptyscribe_core::{RotateConfig, RotatingFile, Rotator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser)]
#[command(name = "ptyscribe")]
#[command(author, version, about = "ptyscribe - record terminal sessions through a PTY proxy", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the current shell inside a recording proxy
    Proxy {
        /// Base log file; the session id is inserted before the extension
        #[arg(short, long)]
        log_file: Option<PathBuf>,

        /// Session id (defaults to $PTYSCRIBE_SESSION_ID, then the tty)
        #[arg(short, long)]
        session_id: Option<String>,

        /// Shell to run (defaults to $SHELL)
        #[arg(long)]
        shell: Option<PathBuf>,

        /// Additional arguments for the shell
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Rotate a log file now
    #[command(name = "rotate-logs")]
    RotateLogs {
        /// Log file to rotate
        #[arg(short, long)]
        log_file: Option<PathBuf>,
    },

    /// Print the most recent output of this session
    Buffer {
        /// Base log file
        #[arg(short, long)]
        log_file: Option<PathBuf>,

        /// Session id
        #[arg(short, long)]
        session_id: Option<String>,

        /// Number of lines to print
        #[arg(short = 'n', long)]
        lines: Option<usize>,
    },

    /// Show the session this shell belongs to
    Status {
        /// Base log file
        #[arg(short, long)]
        log_file: Option<PathBuf>,

        /// Session id
        #[arg(short, long)]
        session_id: Option<String>,
    },

    /// Remove session logs that have not been written for a while
    Sweep {
        /// Base log file
        #[arg(short, long)]
        log_file: Option<PathBuf>,

        /// Age in hours after which a session log is stale
        #[arg(long)]
        max_age_hours: Option<u64>,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The proxy owns the terminal, so its diagnostics go to a file.
    let log_guard = if matches!(cli.command, Commands::Proxy { .. }) {
        Some(init_file_logging(cli.debug)?)
    } else {
        init_logging(cli.debug)?;
        None
    };

    let result = match cli.command {
        Commands::Proxy {
            log_file,
            session_id,
            shell,
            args,
        } => {
            commands::proxy::execute(commands::proxy::ProxyArgs {
                log_file,
                session_id,
                shell,
                args,
            })
            .await
        }
        Commands::RotateLogs { log_file } => commands::rotate::execute(log_file, cli.debug).await,
        Commands::Buffer {
            log_file,
            session_id,
            lines,
        } => commands::buffer::execute(log_file, session_id, lines).await,
        Commands::Status {
            log_file,
            session_id,
        } => commands::status::execute(log_file, session_id).await,
        Commands::Sweep {
            log_file,
            max_age_hours,
        } => commands::sweep::execute(log_file, max_age_hours).await,
        Commands::Version => commands::version::execute().await,
    };

    if let Err(ref e) = result {
        error!("Command failed: {:#}", e);
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        drop(log_guard);
        std::process::exit(1);
    }

    result
}

fn env_filter(debug: bool) -> &'static str {
    if debug {
        "ptyscribe_cli=debug,ptyscribe_core=debug"
    } else {
        "ptyscribe_cli=info"
    }
}

fn init_logging(debug: bool) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(debug))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn init_file_logging(debug: bool) -> Result<WorkerGuard> {
    let settings = config::SettingsManager::load()?;
    let rotation = settings
        .rotation
        .to_config()
        .context("Invalid rotation settings")?;

    let log_file = open_diagnostics_log(&config::SettingsManager::log_path()?, rotation)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(debug))
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    info!("Starting ptyscribe proxy");
    Ok(guard)
}

/// The diagnostics log rotates with the same thresholds as session logs
fn open_diagnostics_log(log_path: &Path, rotation: RotateConfig) -> Result<RotatingFile> {
    if let Some(dir) = log_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {:?}", dir))?;
    }

    RotatingFile::open(log_path, Arc::new(Rotator::new(rotation)))
        .with_context(|| format!("Failed to open diagnostics log {:?}", log_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_diagnostics_log_is_rotated() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("home").join("ptyscribe.log");
        let rotation = RotateConfig {
            max_size: 64,
            max_backups: 2,
            compress: false,
            max_age_days: 7,
        };

        let mut log = open_diagnostics_log(&path, rotation.clone()).unwrap();
        for _ in 0..3 {
            log.write_all(&[b'x'; 50]).unwrap();
        }
        log.flush().unwrap();

        let backups = Rotator::new(rotation).backup_files(&path).unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(std::fs::metadata(&backups[0]).unwrap().len(), 100);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 50);
    }
}
