//! hostsync — snapshot-guarded host-to-host synchronisation.
//!
//! # Usage
//!
//! ```text
//! hostsync init [--config PATH]
//! hostsync sync <target> [--config PATH] [--ssh-option OPT]...
//! hostsync logs [--lines N] [--level LEVEL] [--raw]
//! hostsync unlock
//! hostsync cleanup-snapshots [<target>] [--keep-recent N] [--max-age-days D] [--dry-run]
//! ```

mod commands;

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    cleanup::CleanupArgs, init::InitArgs, logs::LogsArgs, sync::SyncArgs, unlock::UnlockArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "hostsync",
    version,
    about = "Synchronise this machine onto another, with btrfs snapshots around every run",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a full sync onto <target> (an ssh destination).
    Sync(SyncArgs),

    /// Write the default configuration file.
    Init(InitArgs),

    /// Show the newest run log.
    Logs(LogsArgs),

    /// Remove a stuck run lock left by a crashed run.
    Unlock(UnlockArgs),

    /// Delete old run snapshots according to the retention policy.
    CleanupSnapshots(CleanupArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Sync(args) => args.run(),
        Commands::Init(args) => args.run().map(|()| ExitCode::SUCCESS),
        Commands::Logs(args) => args.run().map(|()| ExitCode::SUCCESS),
        Commands::Unlock(args) => args.run().map(|()| ExitCode::SUCCESS),
        Commands::CleanupSnapshots(args) => args.run(),
    }
}
