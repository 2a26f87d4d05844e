//! `hostsync init [--config PATH]`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use hostsync_core::{config, Dirs};

/// Write the commented default configuration.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Where to write the file (default: the user config directory).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let path = match self.config {
            Some(path) => path,
            None => Dirs::discover()?.config_file(),
        };
        let written = config::write_default_at(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;

        if written {
            println!("{} Wrote default configuration to {}", "✓".green(), path.display());
            println!("  Edit sync_jobs and btrfs_snapshots before the first run.");
        } else {
            println!("Configuration already exists at {} (left unchanged)", path.display());
        }
        Ok(())
    }
}
