//! Log sinks: the JSONL run file and the human console.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, IsTerminal, Write};
use std::path::{Path, PathBuf};

use hostsync_core::{Level, LogRecord};

use crate::error::{io_err, LogError};
use crate::format::{render_progress, render_record};
use crate::pipeline::ProgressEvent;

/// A destination for records. Sinks are owned by the pipeline consumer and
/// only ever written from that one task.
pub trait Sink: Send {
    fn name(&self) -> &'static str;

    /// Minimum level this sink accepts.
    fn floor(&self) -> Level;

    fn write_record(&mut self, record: &LogRecord) -> std::io::Result<()>;

    /// Progress is transient; sinks that persist records ignore it.
    fn write_progress(&mut self, _progress: &ProgressEvent) -> std::io::Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()>;
}

// ---------------------------------------------------------------------------
// File sink
// ---------------------------------------------------------------------------

/// One JSON object per line, appended to the run's log file.
pub struct FileSink {
    path: PathBuf,
    floor: Level,
    writer: BufWriter<File>,
}

impl FileSink {
    pub fn create(path: &Path, floor: Level) -> Result<Self, LogError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| io_err(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            floor,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Sink for FileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    fn floor(&self) -> Level {
        self.floor
    }

    fn write_record(&mut self, record: &LogRecord) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// Parse one line written by [`FileSink`].
pub fn parse_line(line: &str) -> Result<LogRecord, serde_json::Error> {
    serde_json::from_str(line)
}

// ---------------------------------------------------------------------------
// Console sink
// ---------------------------------------------------------------------------

/// Renders records and progress as single human-readable lines.
pub struct ConsoleSink {
    out: Box<dyn Write + Send>,
    floor: Level,
    color: bool,
}

impl ConsoleSink {
    pub fn new(out: impl Write + Send + 'static, floor: Level, color: bool) -> Self {
        Self {
            out: Box::new(out),
            floor,
            color,
        }
    }

    /// Console on stderr; colour only when stderr is a terminal.
    pub fn stderr(floor: Level) -> Self {
        let color = std::io::stderr().is_terminal();
        Self::new(std::io::stderr(), floor, color)
    }
}

impl Sink for ConsoleSink {
    fn name(&self) -> &'static str {
        "console"
    }

    fn floor(&self) -> Level {
        self.floor
    }

    fn write_record(&mut self, record: &LogRecord) -> std::io::Result<()> {
        writeln!(self.out, "{}", render_record(record, self.color))
    }

    fn write_progress(&mut self, progress: &ProgressEvent) -> std::io::Result<()> {
        writeln!(self.out, "{}", render_progress(progress, self.color))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.out.flush()
    }
}
