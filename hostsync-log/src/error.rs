//! Error types for hostsync-log.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogError {
    /// The log file could not be created or opened.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A sink failed while writing. Only the first failure is kept.
    #[error("{sink} sink failed: {source}")]
    Sink {
        sink: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("log consumer task failed: {0}")]
    Consumer(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> LogError {
    LogError::Io {
        path: path.into(),
        source,
    }
}
