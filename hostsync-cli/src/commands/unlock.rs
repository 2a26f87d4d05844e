//! `hostsync unlock` — operator removal of a stuck run lock.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use hostsync_core::{lock, Dirs};

#[derive(Args, Debug)]
pub struct UnlockArgs {}

impl UnlockArgs {
    pub fn run(self) -> Result<()> {
        let path = Dirs::discover()?.lock_file();
        let existed = path.exists();
        let removed = lock::force_remove_at(&path)
            .with_context(|| format!("failed to remove {}", path.display()))?;

        match removed {
            Some(record) => {
                println!(
                    "{} Removed lock held by {} on {} since {}",
                    "✓".green(),
                    record.holder,
                    record.host,
                    record.acquired_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
                println!("  Make sure that run is really gone before starting another.");
            }
            None if existed => {
                println!("Removed unreadable lock file {}", path.display());
            }
            None => println!("No lock held ({})", path.display()),
        }
        Ok(())
    }
}
