//! Per-session process lock
//!
//! A lock file holds the decimal pid of the proxy that owns a session. It is
//! created exclusively, guarded with `flock(2)` and removed when the handle is
//! released or dropped. A file whose pid is no longer alive is stale and gets
//! reclaimed by the next proxy. An empty file is given a short grace period
//! first, since its owner may not have taken the flock yet.

use crate::error::{Result, ScribeError};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Exclusive ownership of a session lock file
pub struct ProcessLock {
    path: PathBuf,
    file: Option<Flock<File>>,
    released: bool,
}

/// What currently sits at a lock path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Holder {
    /// A live process owns the lock
    Live(u32),
    /// Someone holds the flock but has not written a pid yet
    Locked,
    /// Missing, unreadable or dead owner
    Stale,
}

/// How long an empty lock file is given to gain its owner's pid
const PID_WRITE_GRACE: Duration = Duration::from_millis(100);

impl ProcessLock {
    /// Acquire the lock at `path`, reclaiming it once if the previous owner is gone.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .map_err(|e| ScribeError::file("create lock directory", dir, e))?;
        }

        let file = match create_exclusive(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                match current_holder(path) {
                    Holder::Live(pid) => return Err(lock_held(path, Some(pid))),
                    Holder::Locked => return Err(lock_held(path, None)),
                    Holder::Stale => {}
                }

                info!(path = %path.display(), "Removing stale lock file");
                match fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(ScribeError::file("remove stale lock", path, e)),
                }

                create_exclusive(path).map_err(|e| {
                    if e.kind() == ErrorKind::AlreadyExists {
                        lock_held(path, read_pid(path))
                    } else {
                        ScribeError::file("create lock file", path, e)
                    }
                })?
            }
            Err(e) => return Err(ScribeError::file("create lock file", path, e)),
        };

        let mut locked = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(locked) => locked,
            Err((file, errno)) => {
                debug!(path = %path.display(), %errno, "flock failed");
                drop(file);
                let _ = fs::remove_file(path);
                return Err(lock_held(path, None));
            }
        };

        let pid = std::process::id();
        let written = writeln!(locked, "{}", pid).and_then(|_| locked.sync_all());
        if let Err(e) = written {
            drop(locked);
            let _ = fs::remove_file(path);
            return Err(ScribeError::file("write pid to lock file", path, e));
        }

        debug!(path = %path.display(), pid, "Acquired process lock");

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(locked),
            released: false,
        })
    }

    /// Pid of the live process holding the lock at `path`, if any.
    pub fn holder(path: &Path) -> Option<u32> {
        match current_holder(path) {
            Holder::Live(pid) => Some(pid),
            Holder::Locked | Holder::Stale => None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unlock, close and remove the lock file.
    pub fn release(mut self) -> Result<()> {
        self.cleanup()
    }

    fn cleanup(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        if let Some(locked) = self.file.take() {
            if let Err((_, errno)) = locked.unlock() {
                warn!(path = %self.path.display(), %errno, "Failed to unlock lock file");
            }
        }

        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Released process lock");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ScribeError::file("remove lock file", &self.path, e)),
        }
    }
}

impl fmt::Debug for ProcessLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessLock")
            .field("path", &self.path)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            warn!("{}", e);
        }
    }
}

fn lock_held(path: &Path, pid: Option<u32>) -> ScribeError {
    ScribeError::LockHeld {
        path: path.to_path_buf(),
        pid,
    }
}

fn create_exclusive(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn current_holder(path: &Path) -> Holder {
    match inspect(path) {
        // The owner may sit between create and flock; look once more.
        Holder::Stale if read_pid(path).is_none() && path.exists() => {
            std::thread::sleep(PID_WRITE_GRACE);
            inspect(path)
        }
        holder => holder,
    }
}

fn inspect(path: &Path) -> Holder {
    if let Some(pid) = read_pid(path) {
        if is_process_running(pid) {
            return Holder::Live(pid);
        }
        return Holder::Stale;
    }

    // No pid yet: the owner may sit between create and write.
    if flock_held(path) {
        Holder::Locked
    } else {
        Holder::Stale
    }
}

fn flock_held(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    match Flock::lock(file, FlockArg::LockSharedNonblock) {
        Ok(_) => false,
        Err((_, errno)) => errno == Errno::EWOULDBLOCK,
    }
}

/// Check if a process is still running
pub fn is_process_running(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || Errno::last() == Errno::EPERM
}
