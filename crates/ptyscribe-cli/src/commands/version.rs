//! Version command

use anyhow::Result;

pub async fn execute() -> Result<()> {
    println!("ptyscribe {}", env!("CARGO_PKG_VERSION"));
    println!("OS/Arch: {}/{}", std::env::consts::OS, std::env::consts::ARCH);
    Ok(())
}
