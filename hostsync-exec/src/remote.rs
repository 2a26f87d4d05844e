//! Executor for the sync target, over a persistent OpenSSH connection.
//!
//! One ControlMaster is started per run; every command multiplexes over its
//! socket. Remote commands are wrapped as
//! `setsid -w sh -c '<command>
//! exit $?' hostsync-<session>-<n>` so each runs in its own remote process
//! group under a shell that keeps the tag in its argv. A command that times
//! out or whose future is dropped is killed on the target by its tag; the
//! session-wide sweep catches whatever is left after that.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use hostsync_core::{CommandResult, HostRole, SessionId};
use tokio::process::Command;

use crate::error::ExecError;
use crate::executor::{with_timeout, Executor, DEFAULT_KILL_WINDOW};
use crate::process::{exit_code, ChildProcess, ProcessControl, ProcessHandle};
use crate::quote::shell_quote;
use crate::tracker::ProcessTracker;

/// ssh exits with 255 when the connection itself failed.
pub const SSH_CONNECTION_FAILURE: i32 = 255;

/// Interval between `pgrep` rounds while waiting for TERM to take effect.
const KILL_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Directory for the ControlMaster socket.
    pub control_dir: PathBuf,
    pub connect_timeout: Duration,
    pub ssh_program: String,
    /// Extra arguments placed before the destination (e.g. `-p 2222`).
    pub extra_args: Vec<String>,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            control_dir: std::env::temp_dir().join("hostsync-ssh"),
            connect_timeout: Duration::from_secs(10),
            ssh_program: "ssh".to_owned(),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct RemoteExecutor {
    destination: String,
    hostname: String,
    session: SessionId,
    options: SshOptions,
    control_path: PathBuf,
    tracker: ProcessTracker,
    next_tag: AtomicU64,
    kill_window: Duration,
}

impl RemoteExecutor {
    /// Start the ControlMaster for `destination` and learn its hostname.
    pub async fn connect(
        destination: &str,
        session: &SessionId,
        options: SshOptions,
    ) -> Result<Self, ExecError> {
        std::fs::create_dir_all(&options.control_dir).map_err(|source| ExecError::Spawn {
            command: format!("mkdir {}", options.control_dir.display()),
            source,
        })?;
        let control_path = options.control_dir.join(format!("{session}.sock"));
        let mut executor = Self {
            destination: destination.to_owned(),
            hostname: destination.to_owned(),
            session: session.clone(),
            options,
            control_path,
            tracker: ProcessTracker::new(),
            next_tag: AtomicU64::new(1),
            kill_window: DEFAULT_KILL_WINDOW,
        };
        executor.start_master().await?;

        let reported = executor.run_command("hostname", Some(executor.options.connect_timeout)).await?;
        if reported.success() && !reported.stdout.trim().is_empty() {
            executor.hostname = reported.stdout.trim().to_owned();
        }
        tracing::info!(host = "target", destination, hostname = %executor.hostname, "connected");
        Ok(executor)
    }

    pub fn with_kill_window(mut self, window: Duration) -> Self {
        self.kill_window = window;
        self
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_owned(),
            format!("ControlPath={}", self.control_path.display()),
            "-o".to_owned(),
            "BatchMode=yes".to_owned(),
            "-o".to_owned(),
            format!("ConnectTimeout={}", self.options.connect_timeout.as_secs().max(1)),
        ];
        args.extend(self.options.extra_args.iter().cloned());
        args
    }

    fn next_tag(&self) -> u64 {
        self.next_tag.fetch_add(1, Ordering::Relaxed)
    }

    /// ssh arguments running `command` in the remote process group `tag`.
    ///
    /// The trailing `exit $?` stops `sh` from exec'ing the last command in
    /// place, which would drop the tag from the process table.
    fn command_args(&self, command: &str, tag: u64) -> Vec<String> {
        let mut args = self.base_args();
        args.push(self.destination.clone());
        args.push(format!(
            "setsid -w sh -c {} hostsync-{}-{tag}",
            shell_quote(&format!("{command}\nexit $?")),
            self.session
        ));
        args
    }

    fn spawn_ssh(&self, args: &[String], label: &str) -> Result<ChildProcess, ExecError> {
        ChildProcess::spawn(&self.options.ssh_program, args, label, &self.tracker)
    }

    /// Run an ssh control operation (`-O check`, `-O exit`).
    async fn control(&self, extra: &[&str]) -> Result<CommandResult, ExecError> {
        let mut args = self.base_args();
        args.extend(extra.iter().map(|s| (*s).to_owned()));
        args.push(self.destination.clone());
        let label = format!("ssh {}", extra.join(" "));
        let child = self.spawn_ssh(&args, &label)?;
        with_timeout(&label, Some(self.options.connect_timeout * 2), child.collect()).await
    }

    async fn start_master(&self) -> Result<(), ExecError> {
        let mut args = self.base_args();
        for opt in ["-o", "ControlMaster=yes", "-o", "ControlPersist=yes", "-f", "-N"] {
            args.push(opt.to_owned());
        }
        args.push(self.destination.clone());
        let child = self.spawn_ssh(&args, "ssh master")?;
        // The backgrounded master inherits the pipes; only wait for the
        // foreground ssh to finish authenticating.
        let started = with_timeout("ssh master", Some(self.options.connect_timeout * 2), child.wait_detached())
            .await
            .map_err(|e| self.connectivity(e.to_string()))?;
        if started.success() {
            Ok(())
        } else {
            Err(self.connectivity(started.stderr.trim().to_owned()))
        }
    }

    fn connectivity(&self, detail: String) -> ExecError {
        ExecError::Connectivity {
            host: self.destination.clone(),
            detail,
        }
    }

    /// Map ssh's own failure code to a connectivity error.
    fn classify(&self, result: CommandResult) -> Result<CommandResult, ExecError> {
        if result.exit_code == SSH_CONNECTION_FAILURE {
            Err(self.connectivity(result.stderr.trim().to_owned()))
        } else {
            Ok(result)
        }
    }

    /// An ssh invocation killing every remote process group matching
    /// `pattern` (an extended regex over the full command line).
    fn remote_kill(&self, pattern: &str, what: String) -> RemoteKill {
        let mut args = self.base_args();
        args.push(self.destination.clone());
        args.push(kill_script(pattern, self.kill_window));
        RemoteKill {
            program: self.options.ssh_program.clone(),
            args,
            limit: self.kill_window + self.options.connect_timeout * 2,
            what,
        }
    }

    fn tag_kill(&self, tag: u64, command: &str) -> RemoteKill {
        self.remote_kill(&format!("[h]ostsync-{}-{tag}$", self.session), format!("'{command}'"))
    }

    /// Kill every tagged process group this session left on the target.
    async fn sweep_remote(&self) {
        let pattern = format!("[h]ostsync-{}-[0-9]+$", self.session);
        self.remote_kill(&pattern, "session sweep".to_owned()).run().await;
    }
}

/// TERM each matching group, give it `window` to exit, then KILL what is
/// left. The `[h]` keeps the script from matching its own command line.
fn kill_script(pattern: &str, window: Duration) -> String {
    let rounds = (window.as_millis() / KILL_POLL.as_millis()).max(1);
    format!(
        "pids=$(pgrep -f '{pattern}') || exit 0; \
         for p in $pids; do kill -TERM -$p 2>/dev/null; done; \
         i=0; while [ $i -lt {rounds} ] && pgrep -f '{pattern}' >/dev/null; do sleep 0.1; i=$((i+1)); done; \
         for p in $(pgrep -f '{pattern}'); do kill -KILL -$p 2>/dev/null; done; true"
    )
}

/// A remote kill, run outside the tracker so `terminate_all_processes`
/// never races it.
#[derive(Debug)]
struct RemoteKill {
    program: String,
    args: Vec<String>,
    limit: Duration,
    what: String,
}

impl RemoteKill {
    async fn run(self) {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        match tokio::time::timeout(self.limit, command.output()).await {
            Ok(Ok(output)) if exit_code(output.status) == 0 => {
                tracing::debug!(host = "target", what = %self.what, "remote kill done");
            }
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                tracing::warn!(
                    host = "target",
                    what = %self.what,
                    code = exit_code(output.status),
                    stderr = %stderr.trim(),
                    "remote kill failed"
                );
            }
            Ok(Err(e)) => tracing::warn!(host = "target", what = %self.what, error = %e, "remote kill failed to start"),
            Err(_) => tracing::warn!(host = "target", what = %self.what, after = ?self.limit, "remote kill timed out"),
        }
    }

    /// Run in the background, for callers that are being dropped.
    fn detach(self) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(self.run());
            }
            Err(_) => tracing::warn!(host = "target", what = %self.what, "no runtime left to kill remote command"),
        }
    }
}

/// Fires its remote kill in the background unless disarmed first.
struct PendingKill(Option<RemoteKill>);

impl PendingKill {
    fn disarm(&mut self) -> Option<RemoteKill> {
        self.0.take()
    }
}

impl Drop for PendingKill {
    fn drop(&mut self) {
        if let Some(kill) = self.0.take() {
            kill.detach();
        }
    }
}

/// A streaming remote command. Killing or dropping it before it exits also
/// kills its tag on the target.
struct RemoteProcess {
    child: ChildProcess,
    pending: PendingKill,
}

#[async_trait]
impl ProcessControl for RemoteProcess {
    fn pid(&self) -> Option<u32> {
        self.child.pid()
    }

    async fn next_stdout_line(&mut self) -> Result<Option<String>, ExecError> {
        self.child.next_stdout_line().await
    }

    async fn wait(&mut self) -> Result<CommandResult, ExecError> {
        let result = self.child.wait().await?;
        if result.exit_code != SSH_CONNECTION_FAILURE {
            self.pending.disarm();
        }
        Ok(result)
    }

    async fn kill(&mut self) -> Result<(), ExecError> {
        if let Some(kill) = self.pending.disarm() {
            kill.run().await;
        }
        self.child.kill().await
    }
}

#[async_trait]
impl Executor for RemoteExecutor {
    fn role(&self) -> HostRole {
        HostRole::Target
    }

    fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn run_command(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandResult, ExecError> {
        let tag = self.next_tag();
        let child = self.spawn_ssh(&self.command_args(command, tag), command)?;
        let mut pending = PendingKill(Some(self.tag_kill(tag, command)));
        let result = with_timeout(command, timeout, child.collect()).await;
        let kill = pending.disarm();
        match result {
            Ok(result) if result.exit_code != SSH_CONNECTION_FAILURE => Ok(result),
            Ok(lost) => self.classify(lost),
            Err(e) => {
                if let Some(kill) = kill {
                    kill.run().await;
                }
                Err(e)
            }
        }
    }

    async fn start_process(&self, command: &str) -> Result<ProcessHandle, ExecError> {
        let tag = self.next_tag();
        let child = self.spawn_ssh(&self.command_args(command, tag), command)?;
        let process = RemoteProcess {
            child,
            pending: PendingKill(Some(self.tag_kill(tag, command))),
        };
        Ok(ProcessHandle::new(command, Box::new(process)))
    }

    async fn terminate_all_processes(&self) {
        self.sweep_remote().await;
        let signalled = self.tracker.terminate_all(self.kill_window).await;
        if signalled > 0 {
            tracing::info!(host = "target", count = signalled, "terminated remote sessions");
        }
    }

    fn tracked_processes(&self) -> usize {
        self.tracker.len()
    }

    async fn check_connection(&self) -> Result<(), ExecError> {
        let check = self
            .control(&["-O", "check"])
            .await
            .map_err(|e| self.connectivity(e.to_string()))?;
        if check.success() {
            Ok(())
        } else {
            Err(self.connectivity(check.stderr.trim().to_owned()))
        }
    }

    async fn reconnect(&self) -> Result<(), ExecError> {
        tracing::info!(host = "target", destination = %self.destination, "re-establishing ssh master");
        let _ = self.control(&["-O", "exit"]).await;
        let _ = std::fs::remove_file(&self.control_path);
        self.start_master().await
    }

    async fn close(&self) {
        let _ = self.control(&["-O", "exit"]).await;
    }
}
