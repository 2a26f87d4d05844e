//! Executor for the machine hostsync runs on.

use std::time::Duration;

use async_trait::async_trait;
use hostsync_core::{CommandResult, HostRole};

use crate::error::ExecError;
use crate::executor::{with_timeout, Executor, DEFAULT_KILL_WINDOW};
use crate::process::{ChildProcess, ProcessHandle};
use crate::tracker::ProcessTracker;

#[derive(Debug)]
pub struct LocalExecutor {
    role: HostRole,
    hostname: String,
    tracker: ProcessTracker,
    kill_window: Duration,
}

impl LocalExecutor {
    pub fn new(role: HostRole) -> Self {
        let hostname = nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_owned());
        Self {
            role,
            hostname,
            tracker: ProcessTracker::new(),
            kill_window: DEFAULT_KILL_WINDOW,
        }
    }

    pub fn with_kill_window(mut self, window: Duration) -> Self {
        self.kill_window = window;
        self
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    fn role(&self) -> HostRole {
        self.role
    }

    fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn run_command(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandResult, ExecError> {
        let child = ChildProcess::shell(command, &self.tracker)?;
        with_timeout(command, timeout, child.collect()).await
    }

    async fn start_process(&self, command: &str) -> Result<ProcessHandle, ExecError> {
        let child = ChildProcess::shell(command, &self.tracker)?;
        Ok(ProcessHandle::new(command, Box::new(child)))
    }

    async fn terminate_all_processes(&self) {
        let signalled = self.tracker.terminate_all(self.kill_window).await;
        if signalled > 0 {
            tracing::info!(host = %self.role, count = signalled, "terminated local processes");
        }
    }

    fn tracked_processes(&self) -> usize {
        self.tracker.len()
    }
}
