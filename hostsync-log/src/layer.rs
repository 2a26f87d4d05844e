//! Bridge from `tracing` into the pipeline.
//!
//! Events emitted by hostsync crates keep their level; events from any other
//! target are marked external and must also clear the external floor.

use std::fmt;

use chrono::Utc;
use hostsync_core::{Context, HostRole, Level, LogRecord};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{self, Layer};
use tracing_subscriber::prelude::*;

use crate::pipeline::{PipelineEvent, PipelineHandle};

const FIRST_PARTY_PREFIX: &str = "hostsync";

pub struct PipelineLayer {
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl PipelineLayer {
    pub fn new(handle: &PipelineHandle) -> Self {
        Self {
            tx: handle.sender(),
        }
    }
}

impl<S: Subscriber> Layer<S> for PipelineLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: layer::Context<'_, S>) {
        let _ = self.tx.send(PipelineEvent::Record(record_from_event(event)));
    }
}

/// Install the bridge as the global subscriber. Returns false when a
/// subscriber was already installed (e.g. by a test harness).
pub fn init_tracing(handle: &PipelineHandle) -> bool {
    tracing_subscriber::registry()
        .with(tracing_subscriber::filter::LevelFilter::DEBUG)
        .with(PipelineLayer::new(handle))
        .try_init()
        .is_ok()
}

fn record_from_event(event: &Event<'_>) -> LogRecord {
    let meta = event.metadata();
    let mut fields = FieldCollector::default();
    event.record(&mut fields);

    let target = meta.target();
    let external = !target.starts_with(FIRST_PARTY_PREFIX);
    let job = fields.job.take().unwrap_or_else(|| {
        if external {
            target.split("::").next().unwrap_or(target).to_owned()
        } else {
            FIRST_PARTY_PREFIX.to_owned()
        }
    });

    LogRecord {
        timestamp: Utc::now(),
        level: level_from_tracing(*meta.level()),
        job,
        host: fields.host,
        event: fields.message.unwrap_or_default(),
        context: fields.context,
        external,
    }
}

fn level_from_tracing(level: tracing::Level) -> Level {
    match level {
        tracing::Level::ERROR => Level::Error,
        tracing::Level::WARN => Level::Warning,
        tracing::Level::INFO => Level::Info,
        tracing::Level::DEBUG | tracing::Level::TRACE => Level::Debug,
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    job: Option<String>,
    host: Option<HostRole>,
    context: Context,
}

impl FieldCollector {
    fn put(&mut self, field: &Field, value: Value) {
        match (field.name(), &value) {
            ("message", Value::String(s)) => self.message = Some(s.clone()),
            ("job", Value::String(s)) => self.job = Some(s.clone()),
            ("host", Value::String(s)) if s == "source" => self.host = Some(HostRole::Source),
            ("host", Value::String(s)) if s == "target" => self.host = Some(HostRole::Target),
            (name, _) => {
                self.context.insert(name.to_owned(), value);
            }
        }
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, Value::from(format!("{value:?}")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::LogPipeline;
    use crate::sink::Sink;
    use std::sync::{Arc, Mutex};

    struct Capture(Arc<Mutex<Vec<LogRecord>>>);

    impl Sink for Capture {
        fn name(&self) -> &'static str {
            "capture"
        }
        fn floor(&self) -> Level {
            Level::Debug
        }
        fn write_record(&mut self, record: &LogRecord) -> std::io::Result<()> {
            self.0.lock().unwrap().push(record.clone());
            Ok(())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn tracing_events_are_classified_by_target() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = LogPipeline::start(vec![Box::new(Capture(seen.clone()))], Level::Warning);
        let subscriber = tracing_subscriber::registry().with(PipelineLayer::new(&pipeline.handle()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "hostsync_exec::remote", job = "orchestrator", attempt = 2, "reconnecting");
            tracing::warn!(target: "russh::client", "keepalive missed");
        });
        pipeline.shutdown().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].job, "orchestrator");
        assert_eq!(seen[0].event, "reconnecting");
        assert_eq!(seen[0].level, Level::Info);
        assert!(!seen[0].external);
        assert_eq!(seen[0].context["attempt"], 2);

        assert!(seen[1].external);
        assert_eq!(seen[1].job, "russh");
        assert_eq!(seen[1].level, Level::Warning);
    }
}
