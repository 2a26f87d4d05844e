//! hostsync command execution.
//!
//! [`Executor`] is the seam between jobs and hosts: [`LocalExecutor`] runs
//! `sh -c` on this machine, [`RemoteExecutor`] multiplexes over an OpenSSH
//! ControlMaster. Both track every child so an interrupted run can reach
//! processes that abandoned jobs left behind.

pub mod error;
pub mod executor;
pub mod local;
pub mod process;
pub mod quote;
pub mod remote;
pub mod tracker;

#[cfg(any(test, feature = "test-support"))]
mod fake;

pub use error::ExecError;
pub use executor::{Executor, DEFAULT_KILL_WINDOW};
pub use local::LocalExecutor;
pub use process::{ProcessControl, ProcessHandle};
pub use quote::shell_quote;
pub use remote::{RemoteExecutor, SshOptions};
pub use tracker::ProcessTracker;

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeExecutor, FakeResponse};
