//! Producer/consumer log pipeline.
//!
//! Every producer ([`Logger`], the tracing bridge) pushes onto one unbounded
//! channel. A single consumer task owns the sinks, applies level floors, and
//! tracks whether any ERROR-or-worse record was seen. Producers never block
//! and never touch a sink.

use hostsync_core::{HostRole, Level, LogRecord, LoggingConfig, ProgressUpdate};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::LogError;
use crate::logger::Logger;
use crate::sink::Sink;

/// A progress report tagged with its producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub job: String,
    pub host: Option<HostRole>,
    pub update: ProgressUpdate,
}

pub(crate) enum PipelineEvent {
    Record(LogRecord),
    Progress(ProgressEvent),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Per-sink floors plus the extra floor for third-party records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Floors {
    pub file: Level,
    pub console: Level,
    pub external: Level,
}

impl From<&LoggingConfig> for Floors {
    fn from(config: &LoggingConfig) -> Self {
        Self {
            file: config.file,
            console: config.tui,
            external: config.external,
        }
    }
}

/// Whether `record` reaches a sink with floor `sink_floor`.
///
/// External records must clear both the sink floor and the external floor.
pub fn passes(record: &LogRecord, sink_floor: Level, external_floor: Level) -> bool {
    record.level >= sink_floor && (!record.external || record.level >= external_floor)
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Cheap, cloneable producer side of the pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::UnboundedSender<PipelineEvent>,
    errors: watch::Receiver<bool>,
}

impl PipelineHandle {
    pub fn logger(&self, job: impl Into<String>) -> Logger {
        Logger::new(self.tx.clone(), job.into())
    }

    /// Resolves once every record enqueued before this call has been
    /// written and the sinks flushed.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(PipelineEvent::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// True once the consumer has processed an ERROR or CRITICAL record.
    ///
    /// Only reflects records already consumed; call [`flush`](Self::flush)
    /// first for a definitive answer.
    pub fn has_errors(&self) -> bool {
        *self.errors.borrow()
    }

    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<PipelineEvent> {
        self.tx.clone()
    }
}

/// Owner of the consumer task.
pub struct LogPipeline {
    handle: PipelineHandle,
    consumer: JoinHandle<Result<(), LogError>>,
}

impl LogPipeline {
    /// Spawn the consumer. Must be called inside a tokio runtime.
    pub fn start(sinks: Vec<Box<dyn Sink>>, external_floor: Level) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (errors_tx, errors_rx) = watch::channel(false);
        let consumer = tokio::spawn(consume(rx, sinks, external_floor, errors_tx));
        Self {
            handle: PipelineHandle {
                tx,
                errors: errors_rx,
            },
            consumer,
        }
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    pub fn logger(&self, job: impl Into<String>) -> Logger {
        self.handle.logger(job)
    }

    /// Drain everything enqueued so far, flush the sinks and stop.
    ///
    /// Returns the first sink failure seen during the run, if any.
    pub async fn shutdown(self) -> Result<(), LogError> {
        let _ = self.handle.tx.send(PipelineEvent::Shutdown);
        match self.consumer.await {
            Ok(result) => result,
            Err(join_err) => Err(LogError::Consumer(join_err.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

async fn consume(
    mut rx: mpsc::UnboundedReceiver<PipelineEvent>,
    mut sinks: Vec<Box<dyn Sink>>,
    external_floor: Level,
    errors: watch::Sender<bool>,
) -> Result<(), LogError> {
    let mut first_failure: Option<LogError> = None;

    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::Record(record) => {
                if record.level.is_error() && !*errors.borrow() {
                    errors.send_replace(true);
                }
                for sink in sinks.iter_mut() {
                    if passes(&record, sink.floor(), external_floor) {
                        if let Err(source) = sink.write_record(&record) {
                            note_failure(&mut first_failure, sink.name(), source);
                        }
                    }
                }
            }
            PipelineEvent::Progress(progress) => {
                for sink in sinks.iter_mut() {
                    if let Err(source) = sink.write_progress(&progress) {
                        note_failure(&mut first_failure, sink.name(), source);
                    }
                }
            }
            PipelineEvent::Flush(ack) => {
                flush_all(&mut sinks, &mut first_failure);
                let _ = ack.send(());
            }
            PipelineEvent::Shutdown => break,
        }
    }

    // Anything still queued behind the shutdown marker is dropped; shutdown
    // is only sent once producers are done.
    flush_all(&mut sinks, &mut first_failure);
    first_failure.map_or(Ok(()), Err)
}

fn flush_all(sinks: &mut [Box<dyn Sink>], first_failure: &mut Option<LogError>) {
    for sink in sinks.iter_mut() {
        if let Err(source) = sink.flush() {
            note_failure(first_failure, sink.name(), source);
        }
    }
}

fn note_failure(slot: &mut Option<LogError>, sink: &'static str, source: std::io::Error) {
    if slot.is_none() {
        *slot = Some(LogError::Sink { sink, source });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Level::Debug, false, Level::Info, Level::Warning, false)]
    #[case(Level::Info, false, Level::Info, Level::Warning, true)]
    #[case(Level::Info, true, Level::Debug, Level::Warning, false)]
    #[case(Level::Warning, true, Level::Debug, Level::Warning, true)]
    #[case(Level::Warning, true, Level::Error, Level::Warning, false)]
    fn floor_rules(
        #[case] level: Level,
        #[case] external: bool,
        #[case] sink_floor: Level,
        #[case] external_floor: Level,
        #[case] expected: bool,
    ) {
        let mut record = LogRecord::new(level, "job", "event");
        record.external = external;
        assert_eq!(passes(&record, sink_floor, external_floor), expected);
    }
}
