//! Spawned processes: one-shot commands and streaming handles.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use hostsync_core::CommandResult;
use nix::sys::signal::Signal;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::error::ExecError;
use crate::tracker::{signal_group, ProcessTracker, Registration};

const DETACHED_STDERR_WAIT: Duration = Duration::from_millis(250);

/// Backend of a [`ProcessHandle`].
#[async_trait]
pub trait ProcessControl: Send {
    fn pid(&self) -> Option<u32>;

    /// Next line of stdout, or `None` once the stream is closed.
    async fn next_stdout_line(&mut self) -> Result<Option<String>, ExecError>;

    /// Wait for exit. Unread stdout is drained and included in the result.
    async fn wait(&mut self) -> Result<CommandResult, ExecError>;

    async fn kill(&mut self) -> Result<(), ExecError>;
}

/// A long-running process started by an executor.
pub struct ProcessHandle {
    command: String,
    inner: Box<dyn ProcessControl>,
}

impl ProcessHandle {
    pub fn new(command: impl Into<String>, inner: Box<dyn ProcessControl>) -> Self {
        Self {
            command: command.into(),
            inner,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.pid()
    }

    pub async fn next_stdout_line(&mut self) -> Result<Option<String>, ExecError> {
        self.inner.next_stdout_line().await
    }

    pub async fn wait(&mut self) -> Result<CommandResult, ExecError> {
        self.inner.wait().await
    }

    pub async fn kill(&mut self) -> Result<(), ExecError> {
        self.inner.kill().await
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("command", &self.command)
            .field("pid", &self.pid())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// OS child processes
// ---------------------------------------------------------------------------

/// A tokio child leading its own process group, registered with a tracker.
pub(crate) struct ChildProcess {
    command: String,
    child: Child,
    stdout: Option<Lines<BufReader<ChildStdout>>>,
    captured: String,
    stderr: Option<JoinHandle<String>>,
    registration: Registration,
}

impl ChildProcess {
    /// Spawn `program args…`. `label` is the command text used in errors.
    pub(crate) fn spawn(
        program: &str,
        args: &[String],
        label: &str,
        tracker: &ProcessTracker,
    ) -> Result<Self, ExecError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Spawn {
                command: label.to_owned(),
                source,
            })?;

        let pid = child.id().ok_or_else(|| ExecError::Spawn {
            command: label.to_owned(),
            source: std::io::Error::other("child exited before it could be tracked"),
        })?;
        let registration = tracker.register(pid, label);

        let stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
        let stderr = child.stderr.take().map(|mut s| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = s.read_to_string(&mut buf).await;
                buf
            })
        });

        tracing::debug!(pid, command = label, "spawned");
        Ok(Self {
            command: label.to_owned(),
            child,
            stdout,
            captured: String::new(),
            stderr,
            registration,
        })
    }

    /// Spawn `sh -c <command>`.
    pub(crate) fn shell(command: &str, tracker: &ProcessTracker) -> Result<Self, ExecError> {
        Self::spawn("sh", &["-c".to_owned(), command.to_owned()], command, tracker)
    }

    /// Read all output and wait for exit.
    pub(crate) async fn collect(mut self) -> Result<CommandResult, ExecError> {
        self.wait().await
    }

    /// Wait for the child itself to exit without draining its pipes.
    ///
    /// For commands that daemonize and hand their pipes to a background
    /// process (an ssh master started with `-f`); stderr is collected only
    /// for a short moment after exit.
    pub(crate) async fn wait_detached(mut self) -> Result<CommandResult, ExecError> {
        let status = self.child.wait().await.map_err(|e| self.io_err(e))?;
        self.registration.finish();
        let stderr = match self.stderr.take() {
            Some(task) => {
                let abort = task.abort_handle();
                match tokio::time::timeout(DETACHED_STDERR_WAIT, task).await {
                    Ok(collected) => collected.unwrap_or_default(),
                    Err(_) => {
                        abort.abort();
                        String::new()
                    }
                }
            }
            None => String::new(),
        };
        Ok(CommandResult::new(exit_code(status), String::new(), stderr))
    }

    fn io_err(&self, source: std::io::Error) -> ExecError {
        ExecError::Io {
            command: self.command.clone(),
            source,
        }
    }
}

#[async_trait]
impl ProcessControl for ChildProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.registration.pid())
    }

    async fn next_stdout_line(&mut self) -> Result<Option<String>, ExecError> {
        let Some(lines) = self.stdout.as_mut() else {
            return Ok(None);
        };
        match lines.next_line().await {
            Ok(Some(line)) => {
                self.captured.push_str(&line);
                self.captured.push('\n');
                Ok(Some(line))
            }
            Ok(None) => {
                self.stdout = None;
                Ok(None)
            }
            Err(e) => Err(self.io_err(e)),
        }
    }

    async fn wait(&mut self) -> Result<CommandResult, ExecError> {
        while self.next_stdout_line().await?.is_some() {}
        let status = self.child.wait().await.map_err(|e| self.io_err(e))?;
        self.registration.finish();
        let stderr = match self.stderr.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        tracing::debug!(command = %self.command, code = exit_code(status), "exited");
        Ok(CommandResult::new(
            exit_code(status),
            std::mem::take(&mut self.captured),
            stderr,
        ))
    }

    async fn kill(&mut self) -> Result<(), ExecError> {
        signal_group(self.registration.pid(), Signal::SIGKILL);
        self.child.start_kill().or_else(|e| match e.kind() {
            // Already reaped.
            std::io::ErrorKind::InvalidInput => Ok(()),
            _ => Err(self.io_err(e)),
        })
    }
}

/// Exit code, or `128 + signal` for signal deaths (shell convention).
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}
