//! Error types for hostsync-engine.

use std::fmt;

use hostsync_core::{ConfigError, HostRole};
use hostsync_exec::ExecError;
use thiserror::Error;

/// Outcome of a failed `Job::execute`.
#[derive(Debug, Error)]
pub enum JobError {
    /// The job stopped because it was asked to. Not a failure; must be
    /// returned after the job's own cleanup, never swallowed.
    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("{0}")]
    Failed(String),
}

impl JobError {
    pub fn failed(message: impl Into<String>) -> Self {
        JobError::Failed(message.into())
    }

    /// A command that exited non-zero where the job needs success.
    pub fn command(command: &str, result: &hostsync_core::CommandResult) -> Self {
        let stderr = result.stderr.trim();
        if stderr.is_empty() {
            JobError::Failed(format!("'{command}' exited with {}", result.exit_code))
        } else {
            JobError::Failed(format!("'{command}' exited with {}: {stderr}", result.exit_code))
        }
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, JobError::Exec(e) if e.is_connectivity())
    }
}

/// A precondition not met on live host state. Collected, never thrown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub job: String,
    pub host: Option<HostRole>,
    pub message: String,
}

impl ValidationError {
    pub fn new(job: impl Into<String>, host: Option<HostRole>, message: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            host,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.host {
            Some(host) => write!(f, "[{}] ({host}) {}", self.job, self.message),
            None => write!(f, "[{}] {}", self.job, self.message),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Configuration problems reported before a run starts.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{count} configuration error(s):\n{details}")]
    InvalidConfig { count: usize, details: String },
}

impl EngineError {
    pub fn from_config_errors(errors: &[ConfigError]) -> Self {
        EngineError::InvalidConfig {
            count: errors.len(),
            details: errors
                .iter()
                .map(|e| format!("  - {e}"))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}
