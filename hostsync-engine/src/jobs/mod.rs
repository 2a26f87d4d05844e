//! Jobs shipped with the engine.

pub mod disk_monitor;
pub mod dummy;
pub mod install;
pub mod snapshot;

pub use disk_monitor::DiskSpaceMonitor;
pub use dummy::DummyJob;
pub use install::InstallJob;
pub use snapshot::SnapshotJob;
