//! Error types for hostsync-core.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Configuration problems. All of them are detected before either host is
/// contacted and are never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure reading or writing a config file.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed YAML; includes the file path and serde_yaml's line context.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("config file not found at {path}; run `hostsync init` to create one")]
    NotFound { path: PathBuf },

    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// A section that must be a mapping is something else.
    #[error("section '{section}' must be a mapping")]
    NotAMapping { section: String },

    #[error("'{section}': unexpected key '{key}'")]
    UnknownKey { section: String, key: String },

    #[error("'{section}': missing required key '{key}'")]
    MissingKey { section: String, key: String },

    #[error("'{section}.{key}': expected {expected}")]
    InvalidType {
        section: String,
        key: String,
        expected: String,
    },

    #[error("'{section}.{key}': {value} is out of range ({range})")]
    OutOfRange {
        section: String,
        key: String,
        value: i64,
        range: String,
    },

    #[error("'{section}.{key}': {message}")]
    InvalidValue {
        section: String,
        key: String,
        message: String,
    },

    /// A job name listed in `sync_jobs` has no registered implementation.
    #[error("unknown job '{name}' in sync_jobs")]
    UnknownJob { name: String },

    /// A system job was listed among the user-configurable sync jobs.
    #[error("'{name}' is a system job and cannot be listed in sync_jobs")]
    SystemJobListed { name: String },

    /// A top-level section names neither a global setting nor a known job.
    #[error("unknown top-level section '{section}'")]
    UnknownSection { section: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}

/// Errors from the run-lock label file.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another run already holds the lock. Stuck locks are never expired
    /// automatically; `hostsync unlock` removes them.
    #[error("another sync is already running: lock held by {holder} on {host} since {acquired_at} ({path})")]
    Held {
        holder: String,
        host: String,
        acquired_at: DateTime<Utc>,
        path: PathBuf,
    },

    #[error("lock I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lock record at {path} is unreadable: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
