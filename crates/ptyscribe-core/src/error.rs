//! Error types for ptyscribe

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for ptyscribe
#[derive(Error, Debug)]
pub enum ScribeError {
    #[error("another instance is already running (lock {}{})", path.display(), holder_suffix(*pid))]
    LockHeld { path: PathBuf, pid: Option<u32> },

    #[error("Failed to start PTY: {0}")]
    PtyAllocationFailed(String),

    #[cfg(unix)]
    #[error("Failed to set raw mode: {0}")]
    TerminalModeFailed(#[source] nix::Error),

    #[error("Failed to compress {}: {source}", path.display())]
    CompressionFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to {action} {}: {source}", path.display())]
    File {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid size format: {0}")]
    InvalidSize(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

fn holder_suffix(pid: Option<u32>) -> String {
    pid.map(|p| format!(", held by pid {p}")).unwrap_or_default()
}

impl ScribeError {
    /// Attach an action and path to an I/O error.
    pub fn file(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ScribeError::File {
            action,
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScribeError>;
