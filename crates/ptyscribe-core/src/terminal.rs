//! Controlling terminal helpers

use nix::sys::termios::{self, SetArg, Termios};
use portable_pty::PtySize;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};

/// Puts a terminal into raw mode and restores the saved attributes on drop
pub struct RawMode {
    fd: RawFd,
    original: Termios,
}

impl RawMode {
    pub fn enable<F: AsFd + AsRawFd>(terminal: &F) -> nix::Result<Self> {
        let fd = terminal.as_fd();
        let original = termios::tcgetattr(fd)?;
        let mut raw = original.clone();
        termios::cfmakeraw(&mut raw);
        termios::tcsetattr(fd, SetArg::TCSANOW, &raw)?;

        Ok(Self {
            fd: terminal.as_raw_fd(),
            original,
        })
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        // The fd belongs to stdin, which outlives the guard.
        let fd = unsafe { BorrowedFd::borrow_raw(self.fd) };
        let _ = termios::tcsetattr(fd, SetArg::TCSANOW, &self.original);
    }
}

/// Window size of the terminal behind `fd`, if it is one
pub fn window_size<F: AsRawFd>(terminal: &F) -> Option<PtySize> {
    let mut winsize: libc::winsize = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::ioctl(terminal.as_raw_fd(), libc::TIOCGWINSZ, &mut winsize) };
    if rc != 0 || winsize.ws_row == 0 || winsize.ws_col == 0 {
        return None;
    }

    Some(PtySize {
        rows: winsize.ws_row,
        cols: winsize.ws_col,
        pixel_width: winsize.ws_xpixel,
        pixel_height: winsize.ws_ypixel,
    })
}
