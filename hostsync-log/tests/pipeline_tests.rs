//! End-to-end pipeline behaviour: routing, floors, error tracking, draining.

use std::io::Write;
use std::sync::{Arc, Mutex};

use hostsync_core::{HostRole, Level, ProgressUpdate};
use hostsync_log::{sink::parse_line, ConsoleSink, FileSink, LogPipeline, Sink};
use tempfile::TempDir;

/// A `Write` that appends into shared memory so the test can inspect it.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn start(dir: &TempDir, console: &SharedBuf) -> (LogPipeline, std::path::PathBuf) {
    let path = dir.path().join("logs").join("sync-test.log");
    let sinks: Vec<Box<dyn Sink>> = vec![
        Box::new(FileSink::create(&path, Level::Debug).unwrap()),
        Box::new(ConsoleSink::new(console.clone(), Level::Info, false)),
    ];
    (LogPipeline::start(sinks, Level::Warning), path)
}

#[tokio::test]
async fn debug_reaches_file_but_not_console() {
    let dir = TempDir::new().unwrap();
    let console = SharedBuf::default();
    let (pipeline, path) = start(&dir, &console);

    let log = pipeline.logger("dummy_success").on_host(HostRole::Source);
    log.debug("loop iteration 3");
    log.info("halfway there");
    pipeline.shutdown().await.unwrap();

    let file = std::fs::read_to_string(&path).unwrap();
    let records: Vec<_> = file.lines().map(|l| parse_line(l).unwrap()).collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].level, Level::Debug);
    assert_eq!(records[0].host, Some(HostRole::Source));

    let console = console.text();
    assert!(!console.contains("loop iteration 3"));
    assert!(console.contains("halfway there"));
}

#[tokio::test]
async fn context_fields_are_written_to_file() {
    let dir = TempDir::new().unwrap();
    let console = SharedBuf::default();
    let (pipeline, path) = start(&dir, &console);

    pipeline
        .logger("disk_space_monitor")
        .event(Level::Warning, "free space below warning threshold")
        .with("free_bytes", 1_024u64)
        .with("mount_point", "/")
        .send();
    pipeline.shutdown().await.unwrap();

    let line = std::fs::read_to_string(&path).unwrap();
    let record = parse_line(line.trim()).unwrap();
    assert_eq!(record.context["free_bytes"], 1024);
    assert_eq!(record.context["mount_point"], "/");
}

#[tokio::test]
async fn has_errors_tracks_error_records_after_flush() {
    let dir = TempDir::new().unwrap();
    let console = SharedBuf::default();
    let (pipeline, _) = start(&dir, &console);
    let handle = pipeline.handle();
    let log = handle.logger("dummy_fail");

    log.warning("only a warning");
    handle.flush().await;
    assert!(!handle.has_errors());

    log.error("simulated failure at 60%");
    handle.flush().await;
    assert!(handle.has_errors());
    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn progress_goes_to_console_only() {
    let dir = TempDir::new().unwrap();
    let console = SharedBuf::default();
    let (pipeline, path) = start(&dir, &console);

    let log = pipeline.logger("dummy_success");
    log.progress(ProgressUpdate::counter(3, 7).with_label("copying"));
    pipeline.shutdown().await.unwrap();

    assert!(console.text().contains("[dummy_success]  42% (3/7) copying"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
}

#[tokio::test]
async fn shutdown_drains_records_from_many_producers() {
    let dir = TempDir::new().unwrap();
    let console = SharedBuf::default();
    let (pipeline, path) = start(&dir, &console);

    let mut tasks = Vec::new();
    for n in 0..4 {
        let log = pipeline.logger(format!("job{n}"));
        tasks.push(tokio::spawn(async move {
            for i in 0..50 {
                log.full(format!("item {i}"));
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    pipeline.shutdown().await.unwrap();

    let file = std::fs::read_to_string(&path).unwrap();
    assert_eq!(file.lines().count(), 200);
}

#[tokio::test]
async fn logging_after_shutdown_is_dropped_silently() {
    let dir = TempDir::new().unwrap();
    let console = SharedBuf::default();
    let (pipeline, _) = start(&dir, &console);
    let log = pipeline.logger("late");
    pipeline.shutdown().await.unwrap();

    log.error("nobody is listening");
    log.progress(ProgressUpdate::heartbeat());
}
