//! Session identity and per-session file paths
//!
//! A session is one logical terminal. Its id picks the log and lock files
//! so that shells started concurrently in different terminals never share them.
//! Two unrelated terminals that reuse the same device name over time map to the
//! same id; the later proxy simply starts a fresh log.

use std::fmt;
use std::path::{Path, PathBuf};

/// Explicit session id override, also exported to the proxied shell
pub const SESSION_ID_ENV: &str = "PTYSCRIBE_SESSION_ID";

/// Set to the proxy's pid inside a proxied shell
pub const PROXY_ACTIVE_ENV: &str = "PTYSCRIBE_PROXY_ACTIVE";

/// Filesystem-safe identifier of a logical terminal session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Sanitize `raw` into an id. Returns `None` when nothing usable is left.
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let trimmed = trimmed.strip_prefix("/dev/").unwrap_or(trimmed);
        let sanitized: String = trimmed
            .chars()
            .map(|c| match c {
                '/' | '\\' | '.' | ':' => '_',
                c if c.is_whitespace() || c.is_control() => '_',
                c => c,
            })
            .collect();
        let sanitized = sanitized.trim_matches('_');

        if sanitized.is_empty() {
            None
        } else {
            Some(Self(sanitized.to_string()))
        }
    }

    fn from_pid(pid: u32) -> Self {
        Self(format!("pid_{pid}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inputs used to derive a session id
#[derive(Debug, Clone, Default)]
pub struct SessionResolver {
    /// `--session-id` or `PTYSCRIBE_SESSION_ID`
    pub explicit: Option<String>,
    /// Controlling terminal device path, e.g. `/dev/pts/3`
    pub tty: Option<String>,
    pub pid: u32,
}

impl SessionResolver {
    /// Gather inputs from the command line override, the environment and stdin.
    pub fn from_env(cli_override: Option<String>) -> Self {
        let explicit = cli_override
            .filter(|s| !s.trim().is_empty())
            .or_else(|| std::env::var(SESSION_ID_ENV).ok());

        let tty = std::env::var("TTY")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .or_else(stdin_tty_name);

        Self {
            explicit,
            tty,
            pid: std::process::id(),
        }
    }

    /// Explicit override first, then the terminal device, then the pid.
    pub fn resolve(&self) -> SessionId {
        self.explicit
            .as_deref()
            .and_then(SessionId::new)
            .or_else(|| self.tty.as_deref().and_then(SessionId::new))
            .unwrap_or_else(|| SessionId::from_pid(self.pid))
    }
}

#[cfg(unix)]
fn stdin_tty_name() -> Option<String> {
    use std::os::fd::AsRawFd;

    let fd = std::io::stdin().as_raw_fd();
    let mut buf = [0 as libc::c_char; 256];
    let rc = unsafe { libc::ttyname_r(fd, buf.as_mut_ptr(), buf.len()) };
    if rc != 0 {
        return None;
    }
    let name = unsafe { std::ffi::CStr::from_ptr(buf.as_ptr()) };
    Some(name.to_string_lossy().into_owned())
}

#[cfg(not(unix))]
fn stdin_tty_name() -> Option<String> {
    None
}

/// Insert `id` between the stem and extension of `base`.
///
/// `/tmp/proxy.log` with id `pts_3` becomes `/tmp/proxy.pts_3.log`.
pub fn session_path(base: &Path, id: &SessionId) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match base.extension() {
        Some(ext) => format!("{}.{}.{}", stem, id, ext.to_string_lossy()),
        None => format!("{}.{}", stem, id),
    };
    base.with_file_name(file_name)
}

/// Files owned by one recording session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub log_path: PathBuf,
    pub lock_path: PathBuf,
}

impl Session {
    pub fn new(id: SessionId, base_log: &Path, base_lock: &Path) -> Self {
        Self {
            log_path: session_path(base_log, &id),
            lock_path: session_path(base_lock, &id),
            id,
        }
    }
}
