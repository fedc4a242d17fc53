//! Reading recent terminal output back out of session logs

use crate::error::{Result, ScribeError};
use crate::session::{session_path, SessionId};
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Only this many trailing bytes are scanned for lines
const TAIL_WINDOW: u64 = 1024 * 1024;

/// Last `n` lines of `path`, joined with `\n`.
///
/// Returns `Ok(None)` when the file does not exist. Invalid UTF-8 is replaced
/// and a trailing `\r` is stripped from each line.
pub fn read_last_lines(path: &Path, n: usize) -> Result<Option<String>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ScribeError::file("open log file", path, e)),
    };

    let len = file
        .metadata()
        .map_err(|e| ScribeError::file("stat log file", path, e))?
        .len();

    let truncated = len > TAIL_WINDOW;
    if truncated {
        debug!(len, "Log file is large, reading last {} bytes", TAIL_WINDOW);
        file.seek(SeekFrom::End(-(TAIL_WINDOW as i64)))
            .map_err(|e| ScribeError::file("seek log file", path, e))?;
    }

    let mut bytes = Vec::with_capacity(len.min(TAIL_WINDOW) as usize);
    file.read_to_end(&mut bytes)
        .map_err(|e| ScribeError::file("read log file", path, e))?;

    let mut text = String::from_utf8_lossy(&bytes).into_owned();
    if truncated {
        // The window most likely starts mid-line.
        text = match text.find('\n') {
            Some(i) => text[i + 1..].to_string(),
            None => text,
        };
    }

    Ok(Some(last_lines(&text, n)))
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text
        .lines()
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// Recent output for a session, falling back to the base log.
///
/// Returns the file that was read along with its last `n` lines, or `None`
/// if neither the session log nor the base log exists.
pub fn read_session_context(
    base: &Path,
    id: Option<&SessionId>,
    n: usize,
) -> Result<Option<(PathBuf, String)>> {
    let candidates = id
        .map(|id| session_path(base, id))
        .into_iter()
        .chain(std::iter::once(base.to_path_buf()));

    for path in candidates {
        if let Some(content) = read_last_lines(&path, n)? {
            return Ok(Some((path, content)));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_last_lines(&dir.path().join("nope.log"), 50)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_returns_last_n_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.log");
        let content: String = (1..=120).map(|i| format!("line {i}\r\n")).collect();
        fs::write(&path, content).unwrap();

        let tail = read_last_lines(&path, 50).unwrap().unwrap();
        let lines: Vec<&str> = tail.lines().collect();
        assert_eq!(lines.len(), 50);
        assert_eq!(lines[0], "line 71");
        assert_eq!(lines[49], "line 120");
        assert!(!tail.contains('\r'));
    }

    #[test]
    fn test_short_file_is_returned_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.log");
        fs::write(&path, "$ ls\nsrc\n$ ").unwrap();

        assert_eq!(read_last_lines(&path, 50).unwrap().unwrap(), "$ ls\nsrc\n$ ");
    }

    #[test]
    fn test_large_file_reads_only_the_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.log");
        let mut content = vec![b'x'; (TAIL_WINDOW as usize) + 10];
        content.extend_from_slice(b"\nlast line\n");
        fs::write(&path, content).unwrap();

        assert_eq!(read_last_lines(&path, 1).unwrap().unwrap(), "last line");
    }

    #[test]
    fn test_session_context_prefers_session_log() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("proxy.log");
        let id = SessionId::new("pts_4").unwrap();

        fs::write(&base, "base output\n").unwrap();
        let (path, content) = read_session_context(&base, Some(&id), 50).unwrap().unwrap();
        assert_eq!(path, base);
        assert_eq!(content, "base output");

        fs::write(session_path(&base, &id), "session output\n").unwrap();
        let (path, content) = read_session_context(&base, Some(&id), 50).unwrap().unwrap();
        assert_eq!(path, session_path(&base, &id));
        assert_eq!(content, "session output");
    }

    #[test]
    fn test_session_context_none_without_logs() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("proxy.log");
        assert!(read_session_context(&base, None, 50).unwrap().is_none());
    }
}
