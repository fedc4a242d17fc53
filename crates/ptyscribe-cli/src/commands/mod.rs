//! CLI commands

pub mod buffer;
pub mod proxy;
pub mod rotate;
pub mod status;
pub mod sweep;
pub mod version;
