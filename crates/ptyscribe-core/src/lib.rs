//! ptyscribe - Core Library
//!
//! Terminal session recording through a PTY proxy, with per-session logs,
//! size and age based rotation, and cleanup of abandoned sessions.

pub mod buffer;
pub mod config;
pub mod error;
#[cfg(unix)]
pub mod lock;
#[cfg(unix)]
pub mod proxy;
pub mod reaper;
pub mod rotate;
pub mod session;
#[cfg(unix)]
pub mod terminal;

pub use config::*;
pub use error::*;
#[cfg(unix)]
pub use lock::ProcessLock;
#[cfg(unix)]
pub use proxy::{Proxy, ProxyExit, ProxyOptions};
pub use reaper::SweepReport;
pub use rotate::{RotatingFile, Rotator};
pub use session::{Session, SessionId, SessionResolver};
