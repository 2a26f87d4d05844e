//! Error types for hostsync-exec.

use std::time::Duration;

use thiserror::Error;

/// Failures of the execution machinery itself.
///
/// A command that runs and exits non-zero is not an error; it is returned
/// as a [`CommandResult`](hostsync_core::CommandResult).
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while running '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' timed out after {after:?}")]
    Timeout { command: String, after: Duration },

    /// The transport to the host is gone. Distinct from any command failure
    /// so callers can decide on reconnection.
    #[error("lost connection to {host}: {detail}")]
    Connectivity { host: String, detail: String },
}

impl ExecError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ExecError::Connectivity { .. })
    }
}
