//! `hostsync cleanup-snapshots` — apply the snapshot retention policy.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use hostsync_core::{lock, Dirs, HostRole, SessionId};
use hostsync_engine::{CleanupEntry, SnapshotCleanup, Verdict};
use hostsync_exec::{Executor, LocalExecutor, RemoteExecutor, SshOptions};
use hostsync_log::{ConsoleSink, LogPipeline, Sink};

#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Also clean up on this ssh destination.
    pub target: Option<String>,

    /// Run groups to keep regardless of age (default: `keep_recent` from config).
    #[arg(long)]
    pub keep_recent: Option<usize>,

    /// Only delete groups older than this many days (default: `max_age_days` from config).
    #[arg(long)]
    pub max_age_days: Option<u32>,

    /// Show what would be deleted without deleting anything.
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Tabled)]
struct CleanupRow {
    #[tabled(rename = "host")]
    host: String,
    #[tabled(rename = "run group")]
    group: String,
    #[tabled(rename = "started")]
    started: String,
    #[tabled(rename = "policy")]
    verdict: String,
    #[tabled(rename = "result")]
    outcome: String,
}

impl From<CleanupEntry> for CleanupRow {
    fn from(entry: CleanupEntry) -> Self {
        let outcome = match entry.verdict {
            Verdict::Delete if entry.outcome.starts_with("failed") => entry.outcome.red().to_string(),
            Verdict::Delete => entry.outcome.yellow().to_string(),
            _ => entry.outcome,
        };
        Self {
            host: entry.host.to_string(),
            group: entry.group,
            started: entry.started.format("%Y-%m-%d %H:%M").to_string(),
            verdict: entry.verdict.to_string(),
            outcome,
        }
    }
}

impl CleanupArgs {
    pub fn run(self) -> Result<ExitCode> {
        let dirs = Dirs::discover()?;
        let config = super::load_config(&dirs, self.config.clone())?;
        let cleanup = SnapshotCleanup::from_config(&config, self.keep_recent, self.max_age_days, self.dry_run)
            .context("invalid btrfs_snapshots section")?;

        let session = SessionId::generate();
        let source = LocalExecutor::new(HostRole::Source);
        let guard = lock::acquire_at(&dirs.lock_file(), &session, source.hostname())
            .context("cannot clean up while a sync holds the run lock")?;

        let sinks: Vec<Box<dyn Sink>> = vec![Box::new(ConsoleSink::stderr(config.logging.tui))];
        let result = super::runtime()?.block_on(async {
            let pipeline = LogPipeline::start(sinks, config.logging.external);
            let log = pipeline.logger("cleanup");
            let entries = self.clean(&dirs, &session, &cleanup, &source, &log).await;
            pipeline.shutdown().await.context("failed to flush logs")?;
            entries
        });
        guard.release().context("failed to release run lock")?;
        let entries = result?;

        let policy = cleanup.policy();
        println!(
            "keep {} most recent{}{}",
            policy.keep_recent,
            policy
                .max_age_days
                .map(|days| format!(", delete only when older than {days} days"))
                .unwrap_or_default(),
            if self.dry_run { " (dry run)" } else { "" }
        );
        if entries.is_empty() {
            println!("No run snapshots found.");
            return Ok(ExitCode::SUCCESS);
        }

        let failed = entries.iter().any(|e| e.outcome.starts_with("failed"));
        let mut table = Table::new(entries.into_iter().map(CleanupRow::from));
        table.with(Style::rounded());
        println!("{table}");
        Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
    }

    async fn clean(
        &self,
        dirs: &Dirs,
        session: &SessionId,
        cleanup: &SnapshotCleanup,
        source: &LocalExecutor,
        log: &hostsync_log::Logger,
    ) -> Result<Vec<CleanupEntry>> {
        let now = Utc::now();
        let mut entries = cleanup
            .run(source, log, now)
            .await
            .context("cleanup on the source failed")?;

        if let Some(destination) = &self.target {
            let options = SshOptions {
                control_dir: dirs.ssh_control_dir(),
                ..SshOptions::default()
            };
            let target = RemoteExecutor::connect(destination, session, options)
                .await
                .with_context(|| format!("failed to connect to {destination}"))?;
            let remote = cleanup.run(&target, log, now).await;
            target.close().await;
            entries.extend(remote.with_context(|| format!("cleanup on {destination} failed"))?);
        }
        Ok(entries)
    }
}
