//! hostsync logging pipeline.
//!
//! Jobs log through a [`Logger`]; records travel over an unbounded channel to
//! one consumer task that owns the [`FileSink`] and [`ConsoleSink`]. Third-party
//! `tracing` output enters through [`PipelineLayer`].

pub mod error;
pub mod format;
pub mod layer;
pub mod logger;
pub mod pipeline;
pub mod sink;

pub use error::LogError;
pub use layer::{init_tracing, PipelineLayer};
pub use logger::{Logger, RecordBuilder};
pub use pipeline::{passes, Floors, LogPipeline, PipelineHandle, ProgressEvent};
pub use sink::{ConsoleSink, FileSink, Sink};
