//! `hostsync sync <target>` — one full orchestrated run.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use hostsync_core::{Configuration, Dirs, HostRole, Level, SessionId, Version};
use hostsync_engine::{
    install_signal_handlers, EngineError, JobOutcome, JobRegistry, Orchestrator,
    OrchestratorSettings, RunReport, RunState,
};
use hostsync_exec::{LocalExecutor, RemoteExecutor, SshOptions};
use hostsync_log::{init_tracing, ConsoleSink, FileSink, LogPipeline, Sink};

/// Arguments for `hostsync sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// ssh destination of the target host (`host`, `user@host`, or an ssh_config alias).
    pub target: String,

    /// Configuration file (default: the user config directory).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Extra ssh argument, repeatable (e.g. `--ssh-option=-p2222`).
    #[arg(long = "ssh-option", value_name = "OPT", allow_hyphen_values = true)]
    pub ssh_options: Vec<String>,
}

impl SyncArgs {
    pub fn run(self) -> Result<ExitCode> {
        let dirs = Dirs::discover()?;
        let config = super::load_config(&dirs, self.config.clone())?;
        let report = super::runtime()?.block_on(self.sync(dirs, config))?;

        print_summary(&report);
        Ok(ExitCode::from(report.exit_code()))
    }

    async fn sync(self, dirs: Dirs, config: Configuration) -> Result<RunReport> {
        let session = SessionId::generate();
        let started = Utc::now();
        let log_file = dirs.run_log_file(started, &session);

        let file = FileSink::create(&log_file, config.logging.file)
            .with_context(|| format!("failed to open log file {}", log_file.display()))?;
        let console = ConsoleSink::stderr(config.logging.tui);
        let sinks: Vec<Box<dyn Sink>> = vec![Box::new(file), Box::new(console)];
        let pipeline = LogPipeline::start(sinks, config.logging.external);
        init_tracing(&pipeline.handle());

        let log = pipeline.logger("hostsync");
        log.event(Level::Debug, "run log")
            .with("path", log_file.display().to_string())
            .send();

        let outcome = self
            .orchestrate(&dirs, config, &pipeline, session, started, log_file)
            .await;
        if let Err(err) = &outcome {
            log.critical(format!("{err:#}"));
        }
        pipeline.shutdown().await.context("failed to flush logs")?;
        outcome
    }

    async fn orchestrate(
        self,
        dirs: &Dirs,
        config: Configuration,
        pipeline: &LogPipeline,
        session: SessionId,
        started: chrono::DateTime<Utc>,
        log_file: PathBuf,
    ) -> Result<RunReport> {
        let version: Version = env!("CARGO_PKG_VERSION")
            .parse::<Version>()
            .map_err(anyhow::Error::msg)
            .context("invalid package version")?;

        // Rejected before connecting; the errors land in the run log.
        let registry = JobRegistry::builtin();
        let errors = registry.check_logged(&config, &pipeline.logger("orchestrator"));
        if !errors.is_empty() {
            return Err(EngineError::from_config_errors(&errors))
                .context("invalid configuration; neither host was touched");
        }

        let options = SshOptions {
            control_dir: dirs.ssh_control_dir(),
            extra_args: self.ssh_options,
            ..SshOptions::default()
        };
        let target = RemoteExecutor::connect(&self.target, &session, options)
            .await
            .with_context(|| format!("failed to connect to {}", self.target))?;
        let source = LocalExecutor::new(HostRole::Source);

        let orchestrator = Orchestrator::new(
            config,
            registry,
            Arc::new(source),
            Arc::new(target),
            pipeline.handle(),
            OrchestratorSettings {
                version,
                session,
                run_started: started,
                lock_path: dirs.lock_file(),
                log_file: Some(log_file),
            },
        );
        let signals = install_signal_handlers(orchestrator.interrupt_sender())
            .context("failed to install signal handlers")?;

        let report = orchestrator.run().await;
        signals.abort();
        Ok(report)
    }
}

#[derive(Tabled)]
struct JobRow {
    #[tabled(rename = "job")]
    job: String,
    #[tabled(rename = "outcome")]
    outcome: String,
}

fn outcome_label(outcome: &JobOutcome) -> String {
    match outcome {
        JobOutcome::Succeeded => "succeeded".green().to_string(),
        JobOutcome::Failed(reason) => format!("{} {reason}", "failed:".red()),
        JobOutcome::Cancelled => "cancelled".yellow().to_string(),
        JobOutcome::Skipped => "skipped".bright_black().to_string(),
    }
}

fn print_summary(report: &RunReport) {
    let state = match report.state {
        RunState::Completed => report.state.to_string().green().bold(),
        RunState::Failed => report.state.to_string().yellow().bold(),
        _ => report.state.to_string().red().bold(),
    };
    println!("hostsync v{} | session {} | {state}", env!("CARGO_PKG_VERSION"), report.session.id);

    if !report.session.results.is_empty() {
        let rows: Vec<JobRow> = report
            .session
            .results
            .iter()
            .map(|(job, outcome)| JobRow {
                job: job.clone(),
                outcome: outcome_label(outcome),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    if let Some(reason) = &report.reason {
        println!("reason: {reason}");
    }
    if report.state != RunState::Completed && !report.pre_snapshots.is_empty() {
        println!("{}", "Rollback point (pre-run snapshots):".bold());
        for snapshot in &report.pre_snapshots {
            println!("  {:<6} {}", snapshot.host.to_string(), snapshot.path.display());
        }
    }
    if let Some(path) = &report.log_file {
        println!("log: {}", path.display());
    }
}
