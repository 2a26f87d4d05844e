pub mod cleanup;
pub mod init;
pub mod logs;
pub mod sync;
pub mod unlock;

use std::path::PathBuf;

use anyhow::{Context, Result};
use hostsync_core::{Configuration, Dirs};

/// Load the config from `explicit` or the default location. Sections are
/// checked against their schemas by the command that uses them.
pub fn load_config(dirs: &Dirs, explicit: Option<PathBuf>) -> Result<Configuration> {
    let path = explicit.unwrap_or_else(|| dirs.config_file());
    Configuration::load_at(&path)
        .with_context(|| format!("failed to load {} (run `hostsync init` first)", path.display()))
}

pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}
