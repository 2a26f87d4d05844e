//! The executor seam: one interface for local and remote command execution.

use std::time::Duration;

use async_trait::async_trait;
use hostsync_core::{CommandResult, HostRole};

use crate::error::ExecError;
use crate::process::ProcessHandle;

/// Default SIGTERM→SIGKILL window used by `terminate_all_processes`.
pub const DEFAULT_KILL_WINDOW: Duration = Duration::from_secs(3);

/// Runs shell commands on one host.
///
/// Every process an executor starts is tracked until it is reaped, so
/// [`terminate_all_processes`](Executor::terminate_all_processes) can
/// reach anything still running after a job has been abandoned.
#[async_trait]
pub trait Executor: Send + Sync {
    fn role(&self) -> HostRole;

    /// Name of the host as it reports itself.
    fn hostname(&self) -> &str;

    /// Run `command` through `sh -c` and wait for it.
    ///
    /// A non-zero exit is returned as data. `timeout` elapsing kills the
    /// process group and yields [`ExecError::Timeout`]. Dropping the future
    /// kills the process group too.
    async fn run_command(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandResult, ExecError>;

    /// Start `command` and return a handle for streaming its output.
    async fn start_process(&self, command: &str) -> Result<ProcessHandle, ExecError>;

    /// Terminate every process this executor started that is still running.
    async fn terminate_all_processes(&self);

    fn tracked_processes(&self) -> usize;

    /// Probe the transport. Local executors are always connected.
    async fn check_connection(&self) -> Result<(), ExecError> {
        Ok(())
    }

    /// Re-establish the transport once.
    async fn reconnect(&self) -> Result<(), ExecError> {
        Ok(())
    }

    /// Tear down the transport at the end of a run.
    async fn close(&self) {}
}

/// Apply an optional timeout to a command future.
pub(crate) async fn with_timeout<F>(
    command: &str,
    timeout: Option<Duration>,
    fut: F,
) -> Result<CommandResult, ExecError>
where
    F: std::future::Future<Output = Result<CommandResult, ExecError>>,
{
    match timeout {
        None => fut.await,
        Some(after) => match tokio::time::timeout(after, fut).await {
            Ok(result) => result,
            Err(_) => Err(ExecError::Timeout {
                command: command.to_owned(),
                after,
            }),
        },
    }
}
