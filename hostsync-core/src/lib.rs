//! hostsync core library: domain types, severity scale, config schema and
//! loader, filesystem locations and the run lock.
//!
//! - [`types`] — newtypes and value types shared across crates
//! - [`schema`] — declarative, closed job config schemas
//! - [`config`] — YAML configuration loading
//! - [`threshold`] — free-space thresholds
//! - [`paths`] — config/log/lock locations
//! - [`lock`] — the label-file run lock

pub mod config;
pub mod error;
pub mod lock;
pub mod paths;
pub mod schema;
pub mod threshold;
pub mod types;

pub use config::{Configuration, LoggingConfig, OrchestratorConfig, SyncJobEntry};
pub use error::{ConfigError, LockError};
pub use paths::Dirs;
pub use schema::{ConfigSchema, FieldType};
pub use threshold::Threshold;
pub use types::{
    CommandResult, Context, HostRole, Level, LogRecord, ProgressUpdate, RunLock, SessionId,
    Snapshot, SnapshotPhase, Version,
};
