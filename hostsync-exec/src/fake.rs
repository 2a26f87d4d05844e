//! Scripted executor for tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hostsync_core::{CommandResult, HostRole};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::ExecError;
use crate::executor::{with_timeout, Executor};
use crate::process::{ProcessControl, ProcessHandle};

/// What a command matching a rule does.
#[derive(Debug, Clone)]
pub enum FakeResponse {
    /// Finish immediately with this result.
    Output(CommandResult),
    /// Finish with this result after a delay, unless terminated first.
    Delayed(Duration, CommandResult),
    /// Never finish on its own; `terminate_all_processes` or killing the
    /// process handle ends it.
    Hang,
    /// Fail as if the transport dropped. The executor stays disconnected
    /// until a successful `reconnect`.
    Connectivity,
}

impl FakeResponse {
    pub fn ok(stdout: impl Into<String>) -> Self {
        FakeResponse::Output(CommandResult::new(0, stdout, ""))
    }

    pub fn exit(code: i32, stderr: impl Into<String>) -> Self {
        FakeResponse::Output(CommandResult::new(code, "", stderr))
    }
}

/// Result reported by a command ended by `terminate_all_processes`.
fn terminated() -> CommandResult {
    CommandResult::new(143, "", "Terminated")
}

struct FakeState {
    rules: Vec<(String, FakeResponse)>,
    calls: Vec<String>,
    connected: bool,
    reconnect_succeeds: bool,
    reconnects: usize,
    terminations: usize,
    live: usize,
    kill_switch: CancellationToken,
}

impl FakeState {
    /// Newest matching rule wins; unmatched commands succeed silently.
    fn response_for(&self, command: &str) -> FakeResponse {
        self.rules
            .iter()
            .rev()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| FakeResponse::ok(""))
    }
}

/// In-memory [`Executor`] driven by substring rules.
#[derive(Clone)]
pub struct FakeExecutor {
    role: HostRole,
    hostname: String,
    inner: Arc<Mutex<FakeState>>,
}

impl FakeExecutor {
    pub fn new(role: HostRole, hostname: impl Into<String>) -> Self {
        Self {
            role,
            hostname: hostname.into(),
            inner: Arc::new(Mutex::new(FakeState {
                rules: Vec::new(),
                calls: Vec::new(),
                connected: true,
                reconnect_succeeds: true,
                reconnects: 0,
                terminations: 0,
                live: 0,
                kill_switch: CancellationToken::new(),
            })),
        }
    }

    /// Commands containing `pattern` get `response`.
    pub fn on(&self, pattern: impl Into<String>, response: FakeResponse) -> &Self {
        self.inner.lock().rules.push((pattern.into(), response));
        self
    }

    /// Every command seen, in order.
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().calls.clone()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.inner.lock().calls.iter().any(|c| c.contains(pattern))
    }

    /// Drop the transport: every command fails until `reconnect`.
    pub fn disconnect(&self) {
        self.inner.lock().connected = false;
    }

    pub fn set_reconnect_succeeds(&self, succeeds: bool) {
        self.inner.lock().reconnect_succeeds = succeeds;
    }

    pub fn reconnects(&self) -> usize {
        self.inner.lock().reconnects
    }

    /// How many times `terminate_all_processes` was called.
    pub fn terminations(&self) -> usize {
        self.inner.lock().terminations
    }

    fn connectivity(&self) -> ExecError {
        ExecError::Connectivity {
            host: self.hostname.clone(),
            detail: "connection closed by remote host".into(),
        }
    }

    /// Record the call and pick its response.
    fn begin(&self, command: &str) -> Result<(FakeResponse, CancellationToken), ExecError> {
        let mut state = self.inner.lock();
        state.calls.push(command.to_owned());
        if !state.connected {
            return Err(self.connectivity());
        }
        let response = state.response_for(command);
        if matches!(response, FakeResponse::Connectivity) {
            state.connected = false;
            return Err(self.connectivity());
        }
        Ok((response, state.kill_switch.clone()))
    }
}

/// Counts a fake process as tracked for as long as it lives.
struct LiveGuard(Arc<Mutex<FakeState>>);

impl LiveGuard {
    fn new(state: &Arc<Mutex<FakeState>>) -> Self {
        state.lock().live += 1;
        Self(state.clone())
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        let mut state = self.0.lock();
        state.live = state.live.saturating_sub(1);
    }
}

#[async_trait]
impl Executor for FakeExecutor {
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
        let (response, kill) = self.begin(command)?;
        match response {
            FakeResponse::Output(result) => Ok(result),
            FakeResponse::Delayed(delay, result) => {
                let _live = LiveGuard::new(&self.inner);
                let run = async {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => Ok(result),
                        _ = kill.cancelled() => Ok(terminated()),
                    }
                };
                with_timeout(command, timeout, run).await
            }
            FakeResponse::Hang => {
                let _live = LiveGuard::new(&self.inner);
                let run = async {
                    kill.cancelled().await;
                    Ok(terminated())
                };
                with_timeout(command, timeout, run).await
            }
            FakeResponse::Connectivity => Err(self.connectivity()),
        }
    }

    async fn start_process(&self, command: &str) -> Result<ProcessHandle, ExecError> {
        let (response, kill) = self.begin(command)?;
        let (delay, result) = match response {
            FakeResponse::Output(result) => (Some(Duration::ZERO), result),
            FakeResponse::Delayed(delay, result) => (Some(delay), result),
            FakeResponse::Hang => (None, terminated()),
            FakeResponse::Connectivity => return Err(self.connectivity()),
        };
        let process = FakeProcess {
            lines: result.stdout.lines().map(str::to_owned).collect(),
            delay,
            result,
            kill: kill.child_token(),
            _live: LiveGuard::new(&self.inner),
        };
        Ok(ProcessHandle::new(command, Box::new(process)))
    }

    async fn terminate_all_processes(&self) {
        let mut state = self.inner.lock();
        state.terminations += 1;
        if state.live == 0 {
            return;
        }
        state.kill_switch.cancel();
        state.kill_switch = CancellationToken::new();
    }

    fn tracked_processes(&self) -> usize {
        self.inner.lock().live
    }

    async fn check_connection(&self) -> Result<(), ExecError> {
        if self.inner.lock().connected {
            Ok(())
        } else {
            Err(self.connectivity())
        }
    }

    async fn reconnect(&self) -> Result<(), ExecError> {
        let mut state = self.inner.lock();
        state.reconnects += 1;
        state.connected = state.reconnect_succeeds;
        if state.connected {
            Ok(())
        } else {
            Err(self.connectivity())
        }
    }
}

struct FakeProcess {
    lines: VecDeque<String>,
    /// `None` hangs until terminated.
    delay: Option<Duration>,
    result: CommandResult,
    kill: CancellationToken,
    _live: LiveGuard,
}

#[async_trait]
impl ProcessControl for FakeProcess {
    fn pid(&self) -> Option<u32> {
        None
    }

    async fn next_stdout_line(&mut self) -> Result<Option<String>, ExecError> {
        if let Some(line) = self.lines.pop_front() {
            return Ok(Some(line));
        }
        if self.delay.is_none() {
            self.kill.cancelled().await;
        }
        Ok(None)
    }

    async fn wait(&mut self) -> Result<CommandResult, ExecError> {
        self.lines.clear();
        match self.delay {
            Some(delay) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => Ok(self.result.clone()),
                    _ = self.kill.cancelled() => Ok(terminated()),
                }
            }
            None => {
                self.kill.cancelled().await;
                Ok(terminated())
            }
        }
    }

    async fn kill(&mut self) -> Result<(), ExecError> {
        self.kill.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn newest_rule_wins_and_calls_are_recorded() {
        let fake = FakeExecutor::new(HostRole::Target, "nas");
        fake.on("hostsync --version", FakeResponse::ok("hostsync 0.1.0\n"))
            .on("hostsync --version", FakeResponse::exit(127, "not found"));

        let result = fake.run_command("hostsync --version", None).await.unwrap();
        assert_eq!(result.exit_code, 127);
        assert!(fake.run_command("true", None).await.unwrap().success());
        assert_eq!(fake.calls(), vec!["hostsync --version", "true"]);
    }

    #[tokio::test]
    async fn hang_ends_on_terminate() {
        let fake = FakeExecutor::new(HostRole::Source, "laptop");
        fake.on("sleep", FakeResponse::Hang);

        let runner = fake.clone();
        let task = tokio::spawn(async move { runner.run_command("sleep 1000", None).await });
        while fake.tracked_processes() == 0 {
            tokio::task::yield_now().await;
        }
        fake.terminate_all_processes().await;
        let result = task.await.unwrap().unwrap();
        assert_eq!(result.exit_code, 143);
        assert_eq!(fake.tracked_processes(), 0);
    }

    #[tokio::test]
    async fn killing_a_handle_leaves_other_processes_running() {
        let fake = FakeExecutor::new(HostRole::Target, "nas");
        fake.on("sleep", FakeResponse::Hang);
        let mut first = fake.start_process("sleep 1").await.unwrap();
        let mut second = fake.start_process("sleep 2").await.unwrap();

        first.kill().await.unwrap();
        assert_eq!(first.wait().await.unwrap().exit_code, 143);
        drop(first);
        assert_eq!(fake.tracked_processes(), 1);

        fake.terminate_all_processes().await;
        assert_eq!(second.wait().await.unwrap().exit_code, 143);
    }

    #[tokio::test]
    async fn connectivity_persists_until_reconnect() {
        let fake = FakeExecutor::new(HostRole::Target, "nas");
        fake.on("rsync", FakeResponse::Connectivity);

        assert!(fake.run_command("rsync -a", None).await.unwrap_err().is_connectivity());
        assert!(fake.check_connection().await.is_err());
        assert!(fake.run_command("true", None).await.is_err());

        fake.reconnect().await.unwrap();
        assert!(fake.run_command("true", None).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_reported() {
        let fake = FakeExecutor::new(HostRole::Source, "laptop");
        fake.on("slow", FakeResponse::Hang);
        let err = fake
            .run_command("slow", Some(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }));
        assert_eq!(fake.tracked_processes(), 0);
    }
}
