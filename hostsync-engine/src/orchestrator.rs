//! The run state machine.
//!
//! ```text
//! Initializing → ConfigValidating → LockAcquiring → VersionReconciling
//!   → SnapshotPreRun → Validating → Executing → SnapshotPostRun
//!   → Completed | Failed | Aborted
//! ```
//!
//! Jobs run strictly one after another. The disk-space monitor is the only
//! concurrent task; it reports fatal conditions on the interrupt channel the
//! operator's signals also use. Whatever happens, the monitor is stopped,
//! tracked processes on both hosts are terminated and the run lock is
//! released before the report is returned.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hostsync_core::lock::{self, RunLockGuard};
use hostsync_core::{Configuration, Level, SessionId, Snapshot, Version};
use hostsync_exec::Executor;
use hostsync_log::{Logger, PipelineHandle};
use serde_yaml::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{JobError, ValidationError};
use crate::interrupt::{self, Interrupt, InterruptReceiver, InterruptSender};
use crate::job::{Job, JobContext};
use crate::registry::{JobRegistry, INSTALL_JOB, MONITOR_JOB, POST_SNAPSHOT_JOB, PRE_SNAPSHOT_JOB};
use crate::session::{JobOutcome, RunReport, RunState, SyncSession};

const LOG_JOB: &str = "orchestrator";

/// How long abandoned work gets to settle after forced termination.
const SETTLE_AFTER_KILL: Duration = Duration::from_secs(5);

/// Run-specific inputs that are not part of the config file.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Version of this binary; the target is reconciled to it.
    pub version: Version,
    pub session: SessionId,
    pub run_started: DateTime<Utc>,
    pub lock_path: PathBuf,
    /// Reported back to the caller; the pipeline owns the file.
    pub log_file: Option<PathBuf>,
}

/// Why the sequence stopped early.
#[derive(Debug)]
struct Abort {
    reason: String,
    interrupt: Option<Interrupt>,
}

/// A supervised future was interrupted. `finished` holds its output if it
/// ended within the grace period.
struct Interrupted<T> {
    interrupt: Interrupt,
    finished: Option<T>,
}

struct PlannedJob {
    job: Arc<dyn Job>,
    ctx: JobContext,
}

impl PlannedJob {
    fn name(&self) -> &str {
        self.job.name()
    }
}

struct Plan {
    install: PlannedJob,
    pre: PlannedJob,
    post: PlannedJob,
    monitor: PlannedJob,
    sync: Vec<PlannedJob>,
}

pub struct Orchestrator {
    config: Configuration,
    registry: JobRegistry,
    source: Arc<dyn Executor>,
    target: Arc<dyn Executor>,
    logs: PipelineHandle,
    log: Logger,
    settings: OrchestratorSettings,
    interrupt_tx: InterruptSender,
    interrupts: InterruptReceiver,
    session: SyncSession,
    phase: RunState,
    lock: Option<RunLockGuard>,
    monitor: Option<(CancellationToken, JoinHandle<Result<(), JobError>>)>,
    user_interrupted: bool,
    last_completed: Option<String>,
    pre_snapshots: Vec<Snapshot>,
    post_snapshots: Vec<Snapshot>,
}

impl Orchestrator {
    pub fn new(
        config: Configuration,
        registry: JobRegistry,
        source: Arc<dyn Executor>,
        target: Arc<dyn Executor>,
        logs: PipelineHandle,
        settings: OrchestratorSettings,
    ) -> Self {
        let (interrupt_tx, interrupts) = interrupt::channel();
        Self {
            log: logs.logger(LOG_JOB),
            session: SyncSession::new(settings.session.clone()),
            config,
            registry,
            source,
            target,
            logs,
            settings,
            interrupt_tx,
            interrupts,
            phase: RunState::Initializing,
            lock: None,
            monitor: None,
            user_interrupted: false,
            last_completed: None,
            pre_snapshots: Vec::new(),
            post_snapshots: Vec::new(),
        }
    }

    /// Sender for operator interrupts (wire signal handlers to this).
    pub fn interrupt_sender(&self) -> InterruptSender {
        self.interrupt_tx.clone()
    }

    /// Drive the run to a terminal state.
    pub async fn run(mut self) -> RunReport {
        let outcome = self.drive().await;
        self.cleanup().await;
        self.finish(outcome).await
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    async fn drive(&mut self) -> Result<(), Abort> {
        self.log
            .event(Level::Info, "starting sync")
            .with("session", self.settings.session.as_str())
            .with("source", self.source.hostname())
            .with("target", self.target.hostname())
            .with("version", self.settings.version.to_string())
            .send();

        self.enter(RunState::ConfigValidating)?;
        let plan = self.plan()?;

        self.enter(RunState::LockAcquiring)?;
        self.acquire_lock()?;

        self.enter(RunState::VersionReconciling)?;
        self.validate_then_execute(&plan.install).await?;

        self.enter(RunState::SnapshotPreRun)?;
        let pre = self.validate_then_execute(&plan.pre).await;
        self.pre_snapshots = plan.pre.job.snapshots();
        pre?;

        self.enter(RunState::Validating)?;
        self.validate_all(&plan).await?;

        self.enter(RunState::Executing)?;
        self.start_monitor(&plan.monitor);
        let executed = self.execute_sync_jobs(&plan.sync).await;
        self.stop_monitor().await;
        executed?;

        self.enter(RunState::SnapshotPostRun)?;
        let post = self.execute(&plan.post).await;
        self.post_snapshots = plan.post.job.snapshots();
        match post {
            Ok(()) => Ok(()),
            Err(abort) if abort.interrupt.is_some() => Err(abort),
            Err(_) => {
                self.log
                    .warning("post-run snapshot failed; completed sync work is kept");
                Ok(())
            }
        }
    }

    /// Move to `next`, unless an interrupt arrived in between.
    fn enter(&mut self, next: RunState) -> Result<(), Abort> {
        if let Some(interrupt) = self.interrupts.try_recv() {
            return Err(self.interrupted(interrupt));
        }
        tracing::debug!(job = LOG_JOB, from = %self.phase, to = %next, "state transition");
        self.phase = next;
        self.log.event(Level::Debug, "phase").with("state", next.to_string()).send();
        Ok(())
    }

    /// Check every section against its schema and build this run's jobs.
    fn plan(&mut self) -> Result<Plan, Abort> {
        let errors = self.registry.check_logged(&self.config, &self.log);
        if !errors.is_empty() {
            return Err(self.abort(format!(
                "{} configuration error(s); neither host was touched",
                errors.len()
            )));
        }

        let base = self.base_context();
        let install = self.instantiate(&base, INSTALL_JOB)?;
        let pre = self.instantiate(&base, PRE_SNAPSHOT_JOB)?;
        let post = self.instantiate(&base, POST_SNAPSHOT_JOB)?;
        let monitor = self.instantiate(&base, MONITOR_JOB)?;
        let names: Vec<String> = self.config.enabled_sync_jobs().map(str::to_owned).collect();
        let sync = names
            .iter()
            .map(|name| self.instantiate(&base, name))
            .collect::<Result<Vec<_>, _>>()?;

        self.log
            .event(Level::Info, "plan ready")
            .with("sync_jobs", &names)
            .send();
        Ok(Plan {
            install,
            pre,
            post,
            monitor,
            sync,
        })
    }

    fn base_context(&self) -> JobContext {
        JobContext {
            config: Value::Null,
            source: self.source.clone(),
            target: self.target.clone(),
            log: self.log.clone(),
            session: self.settings.session.clone(),
            source_hostname: self.source.hostname().to_owned(),
            target_hostname: self.target.hostname().to_owned(),
            run_started: self.settings.run_started,
            version: self.settings.version,
            command_timeout: Some(Duration::from_secs(
                self.config.orchestrator.command_timeout_secs,
            )),
            interrupts: self.interrupt_tx.clone(),
        }
    }

    fn instantiate(&self, base: &JobContext, name: &str) -> Result<PlannedJob, Abort> {
        let Some(descriptor) = self.registry.get(name) else {
            return Err(self.abort(format!("no job registered as '{name}'")));
        };
        let (config, job) = descriptor
            .instantiate(self.config.section(&descriptor.section))
            .map_err(|e| self.abort(e.to_string()))?;
        Ok(PlannedJob {
            ctx: base.for_job(&descriptor.name, config),
            job,
        })
    }

    fn acquire_lock(&mut self) -> Result<(), Abort> {
        match lock::acquire_at(&self.settings.lock_path, &self.settings.session, self.source.hostname()) {
            Ok(guard) => {
                self.log
                    .event(Level::Full, "run lock acquired")
                    .with("holder", &guard.record().holder)
                    .with("path", guard.path().display().to_string())
                    .send();
                self.session.lock_holder = Some(guard.record().holder.clone());
                self.lock = Some(guard);
                Ok(())
            }
            Err(e) => Err(self.abort(e.to_string())),
        }
    }

    /// Validate one system job, then execute it.
    async fn validate_then_execute(&mut self, planned: &PlannedJob) -> Result<(), Abort> {
        let violations = self.validate_jobs(&[planned]).await?;
        if !violations.is_empty() {
            return Err(self.validation_failed(&violations));
        }
        self.execute(planned).await
    }

    /// Validate every sync job, the monitor and the post-run snapshot, in
    /// that order. Nothing executes unless all of them pass.
    async fn validate_all(&mut self, plan: &Plan) -> Result<(), Abort> {
        let order: Vec<&PlannedJob> = plan
            .sync
            .iter()
            .chain([&plan.monitor, &plan.post])
            .collect();
        let violations = self.validate_jobs(&order).await?;
        if violations.is_empty() {
            self.log.info("all jobs validated");
            Ok(())
        } else {
            Err(self.validation_failed(&violations))
        }
    }

    /// Collect the violations of `jobs`, in order.
    ///
    /// Violations found while the target was unreachable say nothing about
    /// the jobs: the connection is re-established once and the batch is
    /// validated again. A second loss aborts the run.
    async fn validate_jobs(&mut self, jobs: &[&PlannedJob]) -> Result<Vec<ValidationError>, Abort> {
        let mut reconnected = false;
        loop {
            let mut violations = Vec::new();
            for planned in jobs {
                match self.supervise(planned.name(), None, planned.job.validate(&planned.ctx)).await {
                    Ok(found) => violations.extend(found),
                    Err(interrupted) => return Err(self.interrupted(interrupted.interrupt)),
                }
            }
            if violations.is_empty() {
                return Ok(violations);
            }
            let Err(e) = self.target.check_connection().await else {
                return Ok(violations);
            };
            if reconnected {
                return Err(self.abort(format!(
                    "connection to {} lost again during validation: {e}; {}",
                    self.target.hostname(),
                    self.last_reachable()
                )));
            }
            self.log.warning(format!(
                "connection to {} lost during validation: {e}; discarding {} violation(s)",
                self.target.hostname(),
                violations.len()
            ));
            self.reconnect_once().await?;
            reconnected = true;
        }
    }

    fn validation_failed(&self, violations: &[ValidationError]) -> Abort {
        for violation in violations {
            let logger = self.logs.logger(violation.job.as_str());
            let mut event = logger.event(Level::Error, violation.message.as_str());
            if let Some(host) = violation.host {
                event = event.host(host);
            }
            event.send();
        }
        self.abort(format!(
            "{} validation error(s); no job was executed",
            violations.len()
        ))
    }

    async fn execute_sync_jobs(&mut self, jobs: &[PlannedJob]) -> Result<(), Abort> {
        for planned in jobs {
            if let Some(interrupt) = self.interrupts.try_recv() {
                return Err(self.interrupted(interrupt));
            }
            if let Err(e) = self.target.check_connection().await {
                self.log
                    .warning(format!("connection to {} lost before {}: {e}", self.target.hostname(), planned.name()));
                self.reconnect_once().await?;
            }
            self.execute(planned).await?;
        }
        Ok(())
    }

    /// Execute one job under interrupt supervision and record its outcome.
    async fn execute(&mut self, planned: &PlannedJob) -> Result<(), Abort> {
        let name = planned.name().to_owned();
        let cancel = CancellationToken::new();
        self.log.info(format!("running {name}"));
        let started = Utc::now();

        let result = self
            .supervise(&name, Some(&cancel), planned.job.execute(&planned.ctx, &cancel))
            .await;

        match result {
            Ok(Ok(())) => {
                self.log
                    .event(Level::Info, format!("{name} finished"))
                    .with("seconds", (Utc::now() - started).num_seconds())
                    .send();
                self.session.record(&name, JobOutcome::Succeeded);
                self.last_completed = Some(name);
                Ok(())
            }
            Ok(Err(JobError::Cancelled)) => {
                self.session.record(&name, JobOutcome::Cancelled);
                Err(self.abort(format!("{name} stopped itself without an interrupt")))
            }
            Ok(Err(e)) if e.is_connectivity() => {
                self.session.record(&name, JobOutcome::Failed(e.to_string()));
                self.log.critical(format!("{name} lost its connection: {e}"));
                match self.reconnect_once().await {
                    Ok(()) => Err(self.abort(format!(
                        "{name} failed on a lost connection; reconnected, but the job is not resumed"
                    ))),
                    Err(abort) => Err(abort),
                }
            }
            Ok(Err(e)) => {
                self.session.record(&name, JobOutcome::Failed(e.to_string()));
                Err(self.abort(format!("{name} failed: {e}")))
            }
            Err(Interrupted { interrupt, finished }) => {
                let outcome = match finished {
                    Some(Ok(())) => JobOutcome::Succeeded,
                    Some(Err(JobError::Cancelled)) | None => JobOutcome::Cancelled,
                    Some(Err(e)) => JobOutcome::Failed(e.to_string()),
                };
                self.session.record(&name, outcome);
                Err(self.interrupted(interrupt))
            }
        }
    }

    /// The single reconnection attempt allowed per connection loss.
    async fn reconnect_once(&mut self) -> Result<(), Abort> {
        let backoff = Duration::from_millis(self.config.orchestrator.reconnect_backoff_ms);
        self.log
            .warning(format!("reconnecting to {} in {}ms", self.target.hostname(), backoff.as_millis()));
        tokio::time::sleep(backoff).await;
        match self.target.reconnect().await {
            Ok(()) => {
                self.log.info(format!("reconnected to {}", self.target.hostname()));
                Ok(())
            }
            Err(e) => Err(self.abort(format!(
                "reconnect to {} failed: {e}; {}",
                self.target.hostname(),
                self.last_reachable()
            ))),
        }
    }

    fn last_reachable(&self) -> String {
        let last = self
            .last_completed
            .as_deref()
            .map(|job| format!(", last completed job {job}"))
            .unwrap_or_default();
        format!("last reachable state: {}{last}", self.phase)
    }

    // -----------------------------------------------------------------------
    // Background monitor
    // -----------------------------------------------------------------------

    fn start_monitor(&mut self, planned: &PlannedJob) {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let job = planned.job.clone();
        let ctx = planned.ctx.clone();
        let handle = tokio::spawn(async move { job.execute(&ctx, &token).await });
        self.log.debug(format!("{} started", planned.name()));
        self.monitor = Some((cancel, handle));
    }

    async fn stop_monitor(&mut self) {
        let Some((cancel, handle)) = self.monitor.take() else {
            return;
        };
        cancel.cancel();
        let abort = handle.abort_handle();
        match tokio::time::timeout(self.grace_period(), handle).await {
            Ok(Ok(Ok(()) | Err(JobError::Cancelled))) => {}
            // A fatal condition was already raised as an interrupt.
            Ok(Ok(Err(e))) => self.log.debug(format!("{MONITOR_JOB} ended: {e}")),
            Ok(Err(join_err)) => self.log.error(format!("{MONITOR_JOB} task failed: {join_err}")),
            Err(_) => {
                abort.abort();
                self.log.warning(format!("{MONITOR_JOB} did not stop in time"));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Interrupts
    // -----------------------------------------------------------------------

    fn grace_period(&self) -> Duration {
        Duration::from_secs(self.config.orchestrator.grace_period_secs)
    }

    /// Run `fut` until it completes or an interrupt arrives.
    ///
    /// On interrupt: cancel `cancel`, give the job the grace period (cut
    /// short by a second interrupt), then terminate everything both
    /// executors still track.
    async fn supervise<T, F>(
        &mut self,
        job: &str,
        cancel: Option<&CancellationToken>,
        fut: F,
    ) -> Result<T, Interrupted<T>>
    where
        F: Future<Output = T>,
    {
        tokio::pin!(fut);
        let interrupt = tokio::select! {
            biased;
            out = &mut fut => return Ok(out),
            Some(interrupt) = self.interrupts.recv() => interrupt,
        };

        self.user_interrupted |= interrupt.is_user();
        self.log
            .warning(format!("{}; cancelling {job}", interrupt.describe()));
        if let Some(cancel) = cancel {
            cancel.cancel();
        }

        let grace = self.grace_period();
        let finished = tokio::select! {
            biased;
            out = &mut fut => Some(out),
            Some(second) = self.interrupts.recv() => {
                self.user_interrupted |= second.is_user();
                self.log.warning(format!("second interrupt; forcing termination of {job}"));
                None
            }
            _ = tokio::time::sleep(grace) => {
                self.log.warning(format!("{job} did not stop within {}s; forcing termination", grace.as_secs()));
                None
            }
        };

        let finished = match finished {
            Some(out) => Some(out),
            None => {
                let source = self.source.clone();
                let target = self.target.clone();
                let force = async move {
                    tokio::join!(source.terminate_all_processes(), target.terminate_all_processes());
                };
                let (_, settled) = tokio::join!(force, tokio::time::timeout(SETTLE_AFTER_KILL, &mut fut));
                settled.ok()
            }
        };
        Err(Interrupted { interrupt, finished })
    }

    fn interrupted(&mut self, interrupt: Interrupt) -> Abort {
        match &interrupt {
            Interrupt::User => {
                self.user_interrupted = true;
                self.log.warning("interrupted by user; remaining jobs skipped");
            }
            Interrupt::Fatal { origin, reason } => {
                self.log.critical(format!("aborting: {origin}: {reason}"));
            }
        }
        Abort {
            reason: interrupt.describe(),
            interrupt: Some(interrupt),
        }
    }

    fn abort(&self, reason: String) -> Abort {
        self.log.critical(reason.clone());
        Abort {
            reason,
            interrupt: None,
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    async fn cleanup(&mut self) {
        self.stop_monitor().await;
        tokio::join!(
            self.source.terminate_all_processes(),
            self.target.terminate_all_processes()
        );
        if let Some(guard) = self.lock.take() {
            match guard.release() {
                Ok(()) => self.log.debug("run lock released"),
                Err(e) => self.log.error(format!("failed to release run lock: {e}")),
            }
        }
        self.source.close().await;
        self.target.close().await;
    }

    async fn finish(mut self, outcome: Result<(), Abort>) -> RunReport {
        for name in self.config.enabled_sync_jobs() {
            if self.session.outcome(name).is_none() {
                self.session.record(name, JobOutcome::Skipped);
            }
        }

        self.logs.flush().await;
        let has_errors = self.logs.has_errors();
        let (state, reason) = match outcome {
            Ok(()) if has_errors => (RunState::Failed, None),
            Ok(()) => (RunState::Completed, None),
            Err(abort) => (RunState::Aborted, Some(abort.reason)),
        };

        self.final_message(state, reason.as_deref());
        self.logs.flush().await;
        self.session.has_errors = self.logs.has_errors();

        RunReport {
            session: self.session,
            state,
            last_phase: self.phase,
            reason,
            interrupted: self.user_interrupted,
            pre_snapshots: self.pre_snapshots,
            post_snapshots: self.post_snapshots,
            log_file: self.settings.log_file,
        }
    }

    fn final_message(&self, state: RunState, reason: Option<&str>) {
        let elapsed = (Utc::now() - self.settings.run_started).num_seconds();
        let (level, mut message) = match state {
            RunState::Completed => (Level::Info, format!("sync completed in {elapsed}s")),
            RunState::Failed => (
                Level::Warning,
                format!("sync finished with errors after {elapsed}s"),
            ),
            _ if self.user_interrupted => (
                Level::Warning,
                format!("sync interrupted during {}", self.phase),
            ),
            _ => (
                Level::Critical,
                format!(
                    "sync aborted during {}: {}",
                    self.phase,
                    reason.unwrap_or("unknown reason")
                ),
            ),
        };

        let rollback: Vec<String> = self
            .pre_snapshots
            .iter()
            .map(|s| format!("{}:{}", s.host, s.path.display()))
            .collect();
        if state != RunState::Completed && !rollback.is_empty() {
            message.push_str("; rollback point: the pre-run snapshots");
        }

        let mut event = self.log.event(level, message).with("state", state.to_string());
        if state != RunState::Completed && !rollback.is_empty() {
            event = event.with("rollback", rollback);
        }
        event.send();
    }
}
