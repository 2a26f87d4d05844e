//! hostsync engine: the job contract, the jobs shipped with hostsync and the
//! orchestrator that sequences them.
//!
//! - [`job`] — the [`Job`] trait, its context and registry descriptors
//! - [`registry`] — name → descriptor lookup and config checking
//! - [`jobs`] — snapshot, install, disk-monitor and reference jobs
//! - [`orchestrator`] — the run state machine
//! - [`interrupt`] — operator signals and fatal conditions
//! - [`cleanup`] — snapshot retention

pub mod btrfs;
pub mod cleanup;
pub mod error;
pub mod interrupt;
pub mod job;
pub mod jobs;
pub mod orchestrator;
pub mod registry;
pub mod session;

pub use cleanup::{CleanupEntry, RetentionPolicy, SnapshotCleanup, Verdict};
pub use error::{EngineError, JobError, ValidationError};
pub use interrupt::{install_signal_handlers, Interrupt, InterruptSender};
pub use job::{Job, JobContext, JobDescriptor, JobKind};
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use registry::JobRegistry;
pub use session::{JobOutcome, RunReport, RunState, SyncSession};
