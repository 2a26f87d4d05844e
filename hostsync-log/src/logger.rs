//! Producer-side logger handed to jobs.

use std::sync::Arc;

use hostsync_core::{HostRole, Level, LogRecord, ProgressUpdate};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::pipeline::{PipelineEvent, ProgressEvent};

/// Enqueues records for one job (and optionally one host).
///
/// Cloning is cheap. Sends never block; once the pipeline has shut down
/// they are silently dropped.
#[derive(Clone)]
pub struct Logger {
    tx: mpsc::UnboundedSender<PipelineEvent>,
    job: Arc<str>,
    host: Option<HostRole>,
}

impl Logger {
    pub(crate) fn new(tx: mpsc::UnboundedSender<PipelineEvent>, job: String) -> Self {
        Self {
            tx,
            job: job.into(),
            host: None,
        }
    }

    /// A logger whose records go nowhere.
    pub fn detached(job: impl Into<String>) -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self::new(tx, job.into())
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    /// Same pipeline, different job tag.
    pub fn with_job(&self, job: impl Into<String>) -> Self {
        Self {
            tx: self.tx.clone(),
            job: Arc::from(job.into()),
            host: self.host,
        }
    }

    /// Same pipeline and job, records tagged with `host`.
    pub fn on_host(&self, host: HostRole) -> Self {
        Self {
            tx: self.tx.clone(),
            job: self.job.clone(),
            host: Some(host),
        }
    }

    /// Start a record with context fields; finish with [`RecordBuilder::send`].
    pub fn event(&self, level: Level, message: impl Into<String>) -> RecordBuilder<'_> {
        let mut record = LogRecord::new(level, self.job.as_ref(), message);
        record.host = self.host;
        RecordBuilder {
            logger: self,
            record,
        }
    }

    pub fn log(&self, level: Level, message: impl Into<String>) {
        self.event(level, message).send();
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(Level::Debug, message);
    }

    pub fn full(&self, message: impl Into<String>) {
        self.log(Level::Full, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(Level::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(Level::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(Level::Error, message);
    }

    pub fn critical(&self, message: impl Into<String>) {
        self.log(Level::Critical, message);
    }

    pub fn progress(&self, update: ProgressUpdate) {
        let _ = self.tx.send(PipelineEvent::Progress(ProgressEvent {
            job: self.job.to_string(),
            host: self.host,
            update,
        }));
    }

    fn enqueue(&self, record: LogRecord) {
        let _ = self.tx.send(PipelineEvent::Record(record));
    }
}

/// A record under construction.
#[must_use = "records are only enqueued by `send()`"]
pub struct RecordBuilder<'a> {
    logger: &'a Logger,
    record: LogRecord,
}

impl RecordBuilder<'_> {
    /// Attach a context field. Values that fail to serialize become `null`.
    pub fn with(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        self.record.context.insert(key.into(), value);
        self
    }

    pub fn host(mut self, host: HostRole) -> Self {
        self.record.host = Some(host);
        self
    }

    pub fn send(self) {
        self.logger.enqueue(self.record);
    }
}
