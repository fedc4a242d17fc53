//! Size and age based log rotation
//!
//! A live log is renamed to `<stem>-<YYYYMMDD-HHMMSS><ext>` once it reaches
//! `max_size`, optionally gzipped, and old backups are pruned by age and count.
//! Every operation on one [`Rotator`] runs under a single mutex.

use crate::config::RotateConfig;
use crate::error::{Result, ScribeError};
use chrono::{DateTime, Local};
use flate2::write::GzEncoder;
use flate2::Compression;
use regex::Regex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;
use tracing::{debug, info, warn};

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Rotates log files according to a [`RotateConfig`]
#[derive(Debug, Default)]
pub struct Rotator {
    config: RotateConfig,
    guard: Mutex<()>,
}

impl Rotator {
    pub fn new(config: RotateConfig) -> Self {
        Self {
            config,
            guard: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &RotateConfig {
        &self.config
    }

    /// Rotate `path` if it has reached `max_size`.
    ///
    /// Returns `Ok(true)` when the live file was moved away. A missing file is
    /// not an error.
    pub fn check_and_rotate(&self, path: &Path) -> Result<bool> {
        let _guard = self.lock();

        let metadata = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(ScribeError::file("stat log file", path, e)),
        };

        if metadata.len() < self.config.max_size {
            return Ok(false);
        }

        self.rotate_file(path)?;
        Ok(true)
    }

    /// Rotate `path` regardless of its size. Still a no-op for a missing file.
    pub fn force_rotate(&self, path: &Path) -> Result<bool> {
        let _guard = self.lock();

        match fs::metadata(path) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(ScribeError::file("stat log file", path, e)),
        }

        self.rotate_file(path)?;
        Ok(true)
    }

    /// Existing backups of `path`, newest first.
    pub fn backup_files(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let _guard = self.lock();
        let backups = list_backups(path)?;
        Ok(backups.into_iter().map(|b| b.path).collect())
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.guard.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rotate_file(&self, path: &Path) -> Result<PathBuf> {
        let backup = backup_path(path, Local::now());

        fs::rename(path, &backup).map_err(|e| ScribeError::file("rename log file", path, e))?;
        info!(from = %path.display(), to = %backup.display(), "Rotated log file");

        let mut rotated = backup.clone();
        if self.config.compress {
            let compressed = gz_path(&backup);
            match compress_file(&backup, &compressed) {
                Ok(()) => {
                    if let Err(e) = fs::remove_file(&backup) {
                        warn!(path = %backup.display(), error = %e, "Failed to remove uncompressed backup");
                    }
                    rotated = compressed;
                }
                Err(e) => {
                    warn!("{}", e);
                    let _ = fs::remove_file(&compressed);
                }
            }
        }

        if let Err(e) = self.prune_backups(path) {
            warn!(path = %path.display(), error = %e, "Failed to clean up old backups");
        }

        Ok(rotated)
    }

    fn prune_backups(&self, path: &Path) -> Result<()> {
        let mut backups = list_backups(path)?;

        if self.config.max_age_days > 0 {
            if let Some(cutoff) = SystemTime::now().checked_sub(self.config.max_age()) {
                backups.retain(|backup| {
                    if backup.modified >= cutoff {
                        return true;
                    }
                    debug!(path = %backup.path.display(), "Removing expired backup");
                    remove_quietly(&backup.path);
                    false
                });
            }
        }

        for backup in backups.iter().skip(self.config.max_backups) {
            debug!(path = %backup.path.display(), "Removing excess backup");
            remove_quietly(&backup.path);
        }

        Ok(())
    }
}

/// Append-only log writer that consults a [`Rotator`] before every write
///
/// When a check rotates the live file away, a fresh file is opened at the same
/// path so later bytes land in the new live log.
pub struct RotatingFile {
    path: PathBuf,
    file: File,
    rotator: Arc<Rotator>,
}

impl RotatingFile {
    pub fn open(path: impl Into<PathBuf>, rotator: Arc<Rotator>) -> Result<Self> {
        let path = path.into();
        let file = open_append(&path).map_err(|e| ScribeError::file("open log file", &path, e))?;
        Ok(Self {
            path,
            file,
            rotator,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.rotator.check_and_rotate(&self.path) {
            Ok(true) => self.file = open_append(&self.path)?,
            Ok(false) => {}
            // Keep recording into the current file.
            Err(e) => warn!("Failed to rotate log file: {}", e),
        }
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

struct Backup {
    path: PathBuf,
    modified: SystemTime,
}

/// Split `path` into (directory, stem, extension with leading dot)
fn split_log_path(path: &Path) -> (PathBuf, String, String) {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (dir, stem, ext)
}

fn backup_path(path: &Path, now: DateTime<Local>) -> PathBuf {
    let (dir, stem, ext) = split_log_path(path);
    let timestamp = now.format(TIMESTAMP_FORMAT);

    let mut candidate = dir.join(format!("{stem}-{timestamp}{ext}"));
    let mut counter = 1;
    while candidate.exists() || gz_path(&candidate).exists() {
        candidate = dir.join(format!("{stem}-{timestamp}-{counter}{ext}"));
        counter += 1;
    }
    candidate
}

fn gz_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".gz");
    PathBuf::from(name)
}

fn backup_pattern(stem: &str, ext: &str) -> Result<Regex> {
    let pattern = format!(
        r"^{}-\d{{8}}-\d{{6}}(?:-\d+)?{}(?:\.gz)?$",
        regex::escape(stem),
        regex::escape(ext)
    );
    Regex::new(&pattern).map_err(|e| ScribeError::Config(format!("backup pattern: {e}")))
}

/// Backups of `path` sorted newest first
fn list_backups(path: &Path) -> Result<Vec<Backup>> {
    let (dir, stem, ext) = split_log_path(path);
    let pattern = backup_pattern(&stem, &ext)?;

    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ScribeError::file("read directory", &dir, e)),
    };

    let mut backups: Vec<Backup> = entries
        .flatten()
        .filter(|entry| pattern.is_match(&entry.file_name().to_string_lossy()))
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            if !metadata.is_file() {
                return None;
            }
            Some(Backup {
                path: entry.path(),
                modified: metadata.modified().ok()?,
            })
        })
        .collect();

    backups.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.path.cmp(&a.path)));
    Ok(backups)
}

fn compress_file(src: &Path, dst: &Path) -> Result<()> {
    let compression_failed = |source| ScribeError::CompressionFailed {
        path: src.to_path_buf(),
        source,
    };

    let mut input = File::open(src).map_err(compression_failed)?;
    let output = File::create(dst).map_err(compression_failed)?;

    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(&mut input, &mut encoder).map_err(compression_failed)?;
    encoder
        .finish()
        .and_then(|file| file.sync_all())
        .map_err(compression_failed)?;

    Ok(())
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove backup");
        }
    }
}
