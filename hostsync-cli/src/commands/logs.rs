//! `hostsync logs` — tail the newest run log.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, IsTerminal};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use hostsync_core::{Dirs, Level};
use hostsync_log::format::render_record;
use hostsync_log::sink::parse_line;

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Number of trailing records to show.
    #[arg(long, short = 'n', default_value_t = 50)]
    pub lines: usize,

    /// Only records at or above this level.
    #[arg(long)]
    pub level: Option<Level>,

    /// Print the JSON lines as stored.
    #[arg(long)]
    pub raw: bool,
}

impl LogsArgs {
    pub fn run(self) -> Result<()> {
        let dirs = Dirs::discover()?;
        match dirs.latest_run_log()? {
            Some(path) => self.print_tail(&path),
            None => {
                println!("no run logs found in {}", dirs.logs_dir().display());
                Ok(())
            }
        }
    }

    fn print_tail(&self, path: &Path) -> Result<()> {
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let reader = BufReader::new(file);
        let floor = self.level.unwrap_or(Level::Debug);

        let mut tail = VecDeque::<String>::new();
        for line in reader.lines() {
            let line = line.with_context(|| format!("read {}", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            let rendered = match parse_line(&line) {
                Ok(record) if record.level < floor => continue,
                Ok(_) if self.raw => line,
                Ok(record) => render_record(&record, std::io::stdout().is_terminal()),
                // Keep unparseable lines visible rather than hiding a truncated write.
                Err(_) => line,
            };
            if tail.len() == self.lines {
                tail.pop_front();
            }
            tail.push_back(rendered);
        }

        println!("==> {} <==", path.display());
        for line in tail {
            println!("{line}");
        }
        Ok(())
    }
}
