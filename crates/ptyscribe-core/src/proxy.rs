//! Recording PTY proxy
//!
//! The proxy runs the user's shell inside a pseudo-terminal and forwards bytes
//! in both directions. Everything the shell prints is written to the real
//! terminal and appended to the session log, which rotates as it grows.
//!
//! Lifecycle of one session:
//!
//! 1. refuse to start inside another proxied shell
//! 2. take the session lock
//! 3. sweep abandoned session logs
//! 4. start a fresh session log
//! 5. open the pty, switch the terminal to raw mode and spawn the shell
//! 6. relay until the shell exits, input closes or SIGINT/SIGTERM arrives
//! 7. restore the terminal, reap the shell and release the lock

use crate::config::RotateConfig;
use crate::error::{Result, ScribeError};
use crate::lock::ProcessLock;
use crate::reaper;
use crate::rotate::{RotatingFile, Rotator};
use crate::session::{Session, SessionResolver, PROXY_ACTIVE_ENV, SESSION_ID_ENV};
use crate::terminal::{self, RawMode};
use portable_pty::{Child, CommandBuilder, MasterPty, NativePtySystem, PtySize, PtySystem};
use std::ffi::OsString;
use std::fs;
use std::io::{self, ErrorKind, IsTerminal, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How long to wait for trailing shell output after the session ends
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

const DEFAULT_SIZE: PtySize = PtySize {
    rows: 24,
    cols: 80,
    pixel_width: 0,
    pixel_height: 0,
};

/// Shell used when none is configured: `$SHELL`, else `/bin/bash`
pub fn default_shell() -> PathBuf {
    std::env::var_os("SHELL")
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/bin/bash"))
}

#[derive(Debug, Clone)]
pub struct ProxyOptions {
    pub shell: PathBuf,
    pub shell_args: Vec<String>,
    /// Base log path, see [`crate::session::session_path`]
    pub base_log: PathBuf,
    pub base_lock: PathBuf,
    /// `--session-id` value, takes precedence over the environment
    pub session_override: Option<String>,
    pub rotation: RotateConfig,
    pub stale_session_age: Duration,
}

/// Why a proxy run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyExit {
    /// Already inside a proxied shell, nothing was started
    Nested,
    ShellExited,
    InputClosed,
    OutputClosed,
    Interrupted,
    Terminated,
}

/// Terminal side of a session
pub struct SessionIo<R, W> {
    pub input: R,
    pub output: W,
    /// Treat stdin as the controlling terminal: raw mode and resize tracking
    pub terminal: bool,
}

enum RelayEnd {
    Input(io::Result<u64>),
    Output(io::Result<u64>),
}

pub struct Proxy {
    options: ProxyOptions,
    rotator: Arc<Rotator>,
}

impl Proxy {
    pub fn new(options: ProxyOptions) -> Self {
        let rotator = Arc::new(Rotator::new(options.rotation.clone()));
        Self { options, rotator }
    }

    pub fn options(&self) -> &ProxyOptions {
        &self.options
    }

    /// Session this process would record
    pub fn session(&self) -> Session {
        let id = SessionResolver::from_env(self.options.session_override.clone()).resolve();
        Session::new(id, &self.options.base_log, &self.options.base_lock)
    }

    /// Proxy the current terminal until the shell exits or a signal arrives.
    pub async fn run(&self) -> Result<ProxyExit> {
        if let Some(owner) = nesting_owner(std::env::var_os(PROXY_ACTIVE_ENV)) {
            info!(
                owner = %owner.to_string_lossy(),
                "Already running inside a proxied shell, not starting another"
            );
            return Ok(ProxyExit::Nested);
        }

        let session = self.session();
        let io = SessionIo {
            input: io::stdin(),
            output: io::stdout(),
            terminal: io::stdin().is_terminal(),
        };
        self.run_session(&session, io).await
    }

    /// Record one session, relaying between `io` and the shell.
    pub async fn run_session<R, W>(&self, session: &Session, io: SessionIo<R, W>) -> Result<ProxyExit>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let lock = ProcessLock::acquire(&session.lock_path)?;
        info!(session = %session.id, log = %session.log_path.display(), "Starting session");

        self.sweep_stale_logs();

        match fs::remove_file(&session.log_path) {
            Ok(()) => debug!(path = %session.log_path.display(), "Removed previous session log"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(ScribeError::file("remove session log", &session.log_path, e)),
        }
        let log = RotatingFile::open(&session.log_path, self.rotator.clone())?;

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigwinch = signal(SignalKind::window_change())?;

        let size = if io.terminal {
            terminal::window_size(&std::io::stdin()).unwrap_or(DEFAULT_SIZE)
        } else {
            DEFAULT_SIZE
        };

        let pair = NativePtySystem::default()
            .openpty(size)
            .map_err(|e| ScribeError::PtyAllocationFailed(e.to_string()))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| ScribeError::PtyAllocationFailed(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| ScribeError::PtyAllocationFailed(e.to_string()))?;

        let raw_mode = if io.terminal {
            Some(RawMode::enable(&std::io::stdin()).map_err(ScribeError::TerminalModeFailed)?)
        } else {
            None
        };

        let mut cmd = CommandBuilder::new(&self.options.shell);
        cmd.args(&self.options.shell_args);
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }
        cmd.env(SESSION_ID_ENV, session.id.as_str());
        cmd.env(PROXY_ACTIVE_ENV, std::process::id().to_string());

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| ScribeError::PtyAllocationFailed(e.to_string()))?;
        // Only the shell may hold the slave side, so reads hit EOF when it exits.
        drop(pair.slave);
        info!(shell = %self.options.shell.display(), pid = ?child.process_id(), "Spawned shell");

        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let input_done = done_tx.clone();
        let input = io.input;
        std::thread::spawn(move || {
            let _ = input_done.send(RelayEnd::Input(relay_input(input, writer)));
        });

        let output = io.output;
        std::thread::spawn(move || {
            let _ = done_tx.send(RelayEnd::Output(relay_output(reader, output, log)));
        });

        let exit = loop {
            tokio::select! {
                end = done_rx.recv() => break match end {
                    Some(RelayEnd::Output(Ok(bytes))) => {
                        debug!(bytes, "Shell output closed");
                        ProxyExit::ShellExited
                    }
                    Some(RelayEnd::Output(Err(e))) => {
                        warn!(error = %e, "Terminal output failed");
                        ProxyExit::OutputClosed
                    }
                    Some(RelayEnd::Input(Ok(bytes))) => {
                        debug!(bytes, "Terminal input closed");
                        ProxyExit::InputClosed
                    }
                    Some(RelayEnd::Input(Err(e))) => {
                        warn!(error = %e, "Terminal input failed");
                        ProxyExit::InputClosed
                    }
                    None => ProxyExit::ShellExited,
                },
                _ = sigint.recv() => break ProxyExit::Interrupted,
                _ = sigterm.recv() => break ProxyExit::Terminated,
                _ = sigwinch.recv() => {
                    if io.terminal {
                        sync_window_size(&*pair.master);
                    }
                }
            }
        };
        info!(?exit, session = %session.id, "Session ending");

        reap_shell(child).await;

        if !matches!(exit, ProxyExit::ShellExited | ProxyExit::OutputClosed) {
            let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
                while let Some(end) = done_rx.recv().await {
                    if let RelayEnd::Output(_) = end {
                        break;
                    }
                }
            })
            .await;
            if drained.is_err() {
                debug!("Shell output still open after shutdown");
            }
        }

        drop(raw_mode);
        drop(pair.master);

        if let Err(e) = lock.release() {
            warn!("{}", e);
        }

        Ok(exit)
    }

    fn sweep_stale_logs(&self) {
        let options = &self.options;
        match reaper::sweep_inactive(&options.base_log, &options.base_lock, options.stale_session_age) {
            Ok(report) => {
                if !report.removed.is_empty() {
                    info!(count = report.removed.len(), "Removed stale session logs");
                }
            }
            Err(e) => warn!("Failed to sweep stale session logs: {}", e),
        }
    }
}

fn sync_window_size(master: &dyn MasterPty) {
    let Some(size) = terminal::window_size(&std::io::stdin()) else {
        return;
    };
    match master.resize(size) {
        Ok(()) => debug!(rows = size.rows, cols = size.cols, "Resized pty"),
        Err(e) => warn!("Failed to resize pty: {}", e),
    }
}

/// Copy terminal input to the shell
fn relay_input<R: Read>(mut input: R, mut writer: Box<dyn Write + Send>) -> io::Result<u64> {
    let mut buf = [0u8; 1024];
    let mut total = 0u64;
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        writer.flush()?;
        total += n as u64;
    }
}

/// Copy shell output to the terminal and the session log
fn relay_output<W: Write>(
    mut reader: Box<dyn Read + Send>,
    mut output: W,
    log: RotatingFile,
) -> io::Result<u64> {
    let mut log = Some(log);
    let mut buf = [0u8; 4096];
    let mut total = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            // Linux reports EIO once the slave side is gone.
            Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
            Err(e) => return Err(e),
        };

        output.write_all(&buf[..n])?;
        output.flush()?;

        let failed = match log.as_mut() {
            Some(file) => file.write_all(&buf[..n]).err(),
            None => None,
        };
        if let Some(e) = failed {
            warn!(error = %e, "Failed to write session log, recording stopped");
            log = None;
        }

        total += n as u64;
    }

    if let Some(mut file) = log {
        if let Err(e) = file.flush() {
            warn!(path = %file.path().display(), error = %e, "Failed to flush session log");
        }
    }
    Ok(total)
}

/// Wait for the shell, killing it if it is still running
async fn reap_shell(mut child: Box<dyn Child + Send + Sync>) {
    match child.try_wait() {
        Ok(Some(status)) => {
            info!(code = status.exit_code(), "Shell exited");
            return;
        }
        Ok(None) => {
            if let Err(e) = child.kill() {
                warn!("Failed to stop shell: {}", e);
            }
        }
        Err(e) => warn!("Failed to query shell status: {}", e),
    }

    match tokio::task::spawn_blocking(move || child.wait()).await {
        Ok(Ok(status)) => info!(code = status.exit_code(), "Shell exited"),
        Ok(Err(e)) => warn!("Failed to wait for shell: {}", e),
        Err(e) => warn!("Shell reaper task failed: {}", e),
    }
}

/// Owner of the enclosing proxy, given the value of the proxy marker variable
fn nesting_owner(marker: Option<OsString>) -> Option<OsString> {
    marker.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;
    use std::path::Path;
    use std::sync::Mutex;

    /// Signal streams are process-wide, so sessions under test run one at a time.
    static SESSIONS: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

    /// Terminal input that never produces a byte
    struct IdleInput;

    impl Read for IdleInput {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            std::thread::sleep(Duration::from_secs(3600));
            Ok(0)
        }
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn bytes(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn options(dir: &Path, script: &str) -> ProxyOptions {
        ProxyOptions {
            shell: PathBuf::from("/bin/sh"),
            shell_args: vec!["-c".to_string(), script.to_string()],
            base_log: dir.join("proxy.log"),
            base_lock: dir.join("proxy.lock"),
            session_override: None,
            rotation: RotateConfig::default(),
            stale_session_age: Duration::from_secs(24 * 3600),
        }
    }

    fn session(options: &ProxyOptions, id: &str) -> Session {
        Session::new(SessionId::new(id).unwrap(), &options.base_log, &options.base_lock)
    }

    fn idle_io(output: Captured) -> SessionIo<IdleInput, Captured> {
        SessionIo {
            input: IdleInput,
            output,
            terminal: false,
        }
    }

    fn position(haystack: &[u8], needle: &[u8]) -> usize {
        haystack
            .windows(needle.len())
            .position(|w| w == needle)
            .unwrap_or_else(|| panic!("{:?} not found", String::from_utf8_lossy(needle)))
    }

    #[tokio::test]
    async fn test_shell_output_is_mirrored_to_log_in_order() {
        let _serial = SESSIONS.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let options = options(dir.path(), "printf 'first\\nsecond\\nthird\\n'");
        let session = session(&options, "test1");
        let proxy = Proxy::new(options);

        let captured = Captured::default();
        let exit = proxy.run_session(&session, idle_io(captured.clone())).await.unwrap();
        assert_eq!(exit, ProxyExit::ShellExited);

        let log = fs::read(&session.log_path).unwrap();
        assert_eq!(log, captured.bytes());

        let first = position(&log, b"first");
        let second = position(&log, b"second");
        let third = position(&log, b"third");
        assert!(first < second && second < third);

        assert!(!session.lock_path.exists());
    }

    #[tokio::test]
    async fn test_previous_session_log_is_replaced() {
        let _serial = SESSIONS.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let options = options(dir.path(), "printf fresh");
        let session = session(&options, "test2");
        fs::write(&session.log_path, "previous session output").unwrap();

        let proxy = Proxy::new(options);
        proxy.run_session(&session, idle_io(Captured::default())).await.unwrap();

        let log = fs::read_to_string(&session.log_path).unwrap();
        assert!(log.contains("fresh"));
        assert!(!log.contains("previous session output"));
    }

    #[tokio::test]
    async fn test_held_lock_leaves_log_untouched() {
        let _serial = SESSIONS.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let options = options(dir.path(), "printf never");
        let session = session(&options, "test3");
        fs::write(&session.log_path, "old").unwrap();
        let _held = ProcessLock::acquire(&session.lock_path).unwrap();

        let proxy = Proxy::new(options);
        let result = proxy.run_session(&session, idle_io(Captured::default())).await;

        assert!(matches!(result, Err(ScribeError::LockHeld { .. })));
        assert_eq!(fs::read_to_string(&session.log_path).unwrap(), "old");
    }

    #[tokio::test]
    async fn test_input_eof_ends_session_and_stops_shell() {
        let _serial = SESSIONS.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let options = options(dir.path(), "sleep 30");
        let session = session(&options, "test4");
        let proxy = Proxy::new(options);

        let io = SessionIo {
            input: io::empty(),
            output: Captured::default(),
            terminal: false,
        };
        let exit = tokio::time::timeout(Duration::from_secs(10), proxy.run_session(&session, io))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(exit, ProxyExit::InputClosed);
        assert!(!session.lock_path.exists());
    }

    #[tokio::test]
    async fn test_stale_logs_of_other_sessions_are_swept() {
        let _serial = SESSIONS.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let options = options(dir.path(), "true");
        let abandoned = dir.path().join("proxy.old.log");
        fs::write(&abandoned, "old").unwrap();
        let old = filetime::FileTime::from_system_time(
            std::time::SystemTime::now() - Duration::from_secs(3 * 24 * 3600),
        );
        filetime::set_file_mtime(&abandoned, old).unwrap();

        let session = session(&options, "test5");
        let proxy = Proxy::new(options);
        proxy.run_session(&session, idle_io(Captured::default())).await.unwrap();

        assert!(!abandoned.exists());
    }

    #[tokio::test]
    async fn test_sigterm_ends_session_and_keeps_recorded_output() {
        let _serial = SESSIONS.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let options = options(dir.path(), "printf hi; sleep 30");
        let session = session(&options, "test6");
        let proxy = Proxy::new(options);

        let terminate = async {
            tokio::time::sleep(Duration::from_millis(700)).await;
            unsafe { libc::kill(std::process::id() as libc::pid_t, libc::SIGTERM) };
        };
        let run = tokio::time::timeout(
            Duration::from_secs(10),
            proxy.run_session(&session, idle_io(Captured::default())),
        );
        let (exit, ()) = tokio::join!(run, terminate);

        assert_eq!(exit.unwrap().unwrap(), ProxyExit::Terminated);
        assert!(!session.lock_path.exists());
        let log = fs::read_to_string(&session.log_path).unwrap();
        assert!(log.contains("hi"));
    }

    #[test]
    fn test_marker_of_enclosing_proxy_means_nested() {
        assert_eq!(nesting_owner(Some("4242".into())), Some(OsString::from("4242")));
        assert_eq!(nesting_owner(Some(OsString::new())), None);
        assert_eq!(nesting_owner(None), None);
    }
}
