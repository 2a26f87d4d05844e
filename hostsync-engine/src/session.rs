//! Per-run state: the state machine's states, job outcomes and the final
//! report.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use hostsync_core::{SessionId, Snapshot};

/// Orchestrator states in the order a run passes through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RunState {
    Initializing,
    ConfigValidating,
    LockAcquiring,
    VersionReconciling,
    SnapshotPreRun,
    Validating,
    Executing,
    SnapshotPostRun,
    Completed,
    Failed,
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Initializing => "initializing",
            RunState::ConfigValidating => "config-validating",
            RunState::LockAcquiring => "lock-acquiring",
            RunState::VersionReconciling => "version-reconciling",
            RunState::SnapshotPreRun => "snapshot-pre-run",
            RunState::Validating => "validating",
            RunState::Executing => "executing",
            RunState::SnapshotPostRun => "snapshot-post-run",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// What happened to one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed(String),
    Cancelled,
    /// Never started because the sequence stopped first.
    Skipped,
}

/// Mutable per-run aggregate, owned by the orchestrator.
#[derive(Debug, Clone)]
pub struct SyncSession {
    pub id: SessionId,
    /// Holder identity written into the run lock, once acquired.
    pub lock_holder: Option<String>,
    pub results: BTreeMap<String, JobOutcome>,
    /// Copied from the log pipeline when the run is finalized.
    pub has_errors: bool,
}

impl SyncSession {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            lock_holder: None,
            results: BTreeMap::new(),
            has_errors: false,
        }
    }

    pub fn record(&mut self, job: &str, outcome: JobOutcome) {
        self.results.insert(job.to_owned(), outcome);
    }

    pub fn outcome(&self, job: &str) -> Option<&JobOutcome> {
        self.results.get(job)
    }
}

/// Final result of [`Orchestrator::run`](crate::Orchestrator::run).
#[derive(Debug, Clone)]
pub struct RunReport {
    pub session: SyncSession,
    /// Terminal state.
    pub state: RunState,
    /// Last non-terminal state the run reached.
    pub last_phase: RunState,
    /// Why the run aborted, when it did.
    pub reason: Option<String>,
    /// The run was stopped by an operator interrupt.
    pub interrupted: bool,
    pub pre_snapshots: Vec<Snapshot>,
    pub post_snapshots: Vec<Snapshot>,
    pub log_file: Option<PathBuf>,
}

impl RunReport {
    pub const EXIT_OK: u8 = 0;
    pub const EXIT_FAILED: u8 = 1;
    /// 128 + SIGINT.
    pub const EXIT_INTERRUPTED: u8 = 130;

    pub fn exit_code(&self) -> u8 {
        if self.interrupted {
            Self::EXIT_INTERRUPTED
        } else if self.state == RunState::Completed {
            Self::EXIT_OK
        } else {
            Self::EXIT_FAILED
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn report(state: RunState, interrupted: bool) -> RunReport {
        RunReport {
            session: SyncSession::new(SessionId::from("ab12cd34")),
            state,
            last_phase: RunState::Executing,
            reason: None,
            interrupted,
            pre_snapshots: Vec::new(),
            post_snapshots: Vec::new(),
            log_file: None,
        }
    }

    #[rstest]
    #[case(RunState::Completed, false, 0)]
    #[case(RunState::Failed, false, 1)]
    #[case(RunState::Aborted, false, 1)]
    #[case(RunState::Aborted, true, 130)]
    fn exit_codes(#[case] state: RunState, #[case] interrupted: bool, #[case] code: u8) {
        assert_eq!(report(state, interrupted).exit_code(), code);
    }

    #[test]
    fn states_are_ordered_as_the_run_proceeds() {
        assert!(RunState::LockAcquiring < RunState::VersionReconciling);
        assert!(RunState::SnapshotPreRun < RunState::Validating);
        assert!(RunState::Executing < RunState::SnapshotPostRun);
    }
}
