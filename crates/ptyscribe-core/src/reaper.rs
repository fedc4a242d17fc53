//! Removal of abandoned session logs
//!
//! Session logs live next to the base log as `<stem>.<id><ext>`. Any of them
//! not modified within the stale window is deleted. The base log itself and
//! rotation backups are never touched here.

use crate::error::{Result, ScribeError};
#[cfg(unix)]
use crate::lock::ProcessLock;
#[cfg(unix)]
use crate::session::{session_path, SessionId};
use regex::Regex;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Outcome of one sweep
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Session logs that were deleted
    pub removed: Vec<PathBuf>,
    /// Stale logs skipped because their session is still active
    pub kept_active: Vec<PathBuf>,
}

/// Delete session logs of `base` older than `max_age`.
pub fn sweep(base: &Path, max_age: Duration) -> Result<SweepReport> {
    sweep_except(base, max_age, |_| false)
}

/// Like [`sweep`], but leaves logs whose session id satisfies `is_active`.
pub fn sweep_except<F>(base: &Path, max_age: Duration, is_active: F) -> Result<SweepReport>
where
    F: Fn(&str) -> bool,
{
    let mut report = SweepReport::default();

    let Some(cutoff) = SystemTime::now().checked_sub(max_age) else {
        return Ok(report);
    };

    let dir = match base.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let pattern = session_log_pattern(base)?;
    let backup_suffix = backup_suffix_pattern()?;

    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(ScribeError::file("read directory", &dir, e)),
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some(id) = pattern.captures(&name).and_then(|c| c.get(1)) else {
            continue;
        };
        // `<stem>.<id>-<timestamp><ext>` is a rotation backup of a session log.
        if backup_suffix.is_match(id.as_str()) {
            continue;
        }

        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        if modified >= cutoff {
            continue;
        }

        let path = entry.path();
        if is_active(id.as_str()) {
            debug!(path = %path.display(), "Keeping stale log of active session");
            report.kept_active.push(path);
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "Removed stale session log");
                report.removed.push(path);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove stale session log"),
        }
    }

    Ok(report)
}

/// Like [`sweep`], skipping sessions whose lock under `base_lock` is held by
/// a live process.
#[cfg(unix)]
pub fn sweep_inactive(base_log: &Path, base_lock: &Path, max_age: Duration) -> Result<SweepReport> {
    sweep_except(base_log, max_age, |id| {
        SessionId::new(id)
            .map(|id| ProcessLock::holder(&session_path(base_lock, &id)).is_some())
            .unwrap_or(false)
    })
}

/// Matches `<stem>.<id><ext>` and captures the id
fn session_log_pattern(base: &Path) -> Result<Regex> {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = base
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let pattern = format!(
        r"^{}\.([^./\\]+){}$",
        regex::escape(&stem),
        regex::escape(&ext)
    );
    Regex::new(&pattern).map_err(|e| ScribeError::Config(format!("session log pattern: {e}")))
}

/// Timestamp suffix the rotator appends to backups
fn backup_suffix_pattern() -> Result<Regex> {
    Regex::new(r"-\d{8}-\d{6}(?:-\d+)?$")
        .map_err(|e| ScribeError::Config(format!("backup suffix pattern: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;

    fn touch(path: &Path, age: Duration) {
        fs::write(path, b"output").unwrap();
        let mtime = FileTime::from_system_time(SystemTime::now() - age);
        filetime::set_file_mtime(path, mtime).unwrap();
    }

    const DAY: Duration = Duration::from_secs(24 * 3600);

    #[test]
    fn test_removes_only_stale_session_logs() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("p.log");

        let stale = dir.path().join("p.sessA.log");
        let fresh = dir.path().join("p.sessB.log");
        touch(&stale, 2 * DAY);
        touch(&fresh, Duration::from_secs(3600));
        touch(&base, 10 * DAY);

        let report = sweep(&base, DAY).unwrap();

        assert_eq!(report.removed, vec![stale.clone()]);
        assert!(!stale.exists());
        assert!(fresh.exists());
        assert!(base.exists());
    }

    #[test]
    fn test_ignores_backups_and_unrelated_files() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("p.log");

        let keep = [
            dir.path().join("p-20200101-000000.log.gz"),
            dir.path().join("p.a.b.log"),
            dir.path().join("px.sess.log"),
            dir.path().join("p.sess.txt"),
            dir.path().join("other.log"),
        ];
        for path in &keep {
            touch(path, 5 * DAY);
        }

        let report = sweep(&base, DAY).unwrap();
        assert!(report.removed.is_empty());
        for path in &keep {
            assert!(path.exists(), "{} should survive", path.display());
        }
    }

    #[test]
    fn test_session_log_backups_are_left_to_the_rotator() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("p.log");

        let backup = dir.path().join("p.pts_1-20200101-000000.log");
        let numbered = dir.path().join("p.pts_1-20200101-000000-2.log");
        let compressed = dir.path().join("p.pts_1-20200101-000000.log.gz");
        let abandoned = dir.path().join("p.pts_1.log");
        for path in [&backup, &numbered, &compressed, &abandoned] {
            touch(path, 2 * DAY);
        }

        let report = sweep(&base, DAY).unwrap();

        assert_eq!(report.removed, vec![abandoned]);
        assert!(backup.exists());
        assert!(numbered.exists());
        assert!(compressed.exists());
    }

    #[test]
    fn test_active_sessions_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("p.log");
        let idle = dir.path().join("p.pts_1.log");
        let gone = dir.path().join("p.pts_2.log");
        touch(&idle, 3 * DAY);
        touch(&gone, 3 * DAY);

        let report = sweep_except(&base, DAY, |id| id == "pts_1").unwrap();
        assert_eq!(report.removed, vec![gone]);
        assert_eq!(report.kept_active, vec![idle.clone()]);
        assert!(idle.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_sessions_with_live_lock_survive() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("p.log");
        let base_lock = dir.path().join("p.lock");
        let held = dir.path().join("p.pts_7.log");
        let orphan = dir.path().join("p.pts_8.log");
        touch(&held, 3 * DAY);
        touch(&orphan, 3 * DAY);

        let _lock = ProcessLock::acquire(&dir.path().join("p.pts_7.lock")).unwrap();
        let report = sweep_inactive(&base, &base_lock, DAY).unwrap();

        assert_eq!(report.removed, vec![orphan]);
        assert!(held.exists());
    }

    #[test]
    fn test_missing_directory_is_empty_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("missing/p.log");
        assert!(sweep(&base, DAY).unwrap().removed.is_empty());
    }
}
