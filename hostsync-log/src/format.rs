//! Human-readable rendering shared by the console sink and `hostsync logs`.

use colored::{ColoredString, Colorize};
use hostsync_core::{Level, LogRecord};
use serde_json::Value;

use crate::pipeline::ProgressEvent;

/// `HH:MM:SS LEVEL    [job] (host) message key=value …`
pub fn render_record(record: &LogRecord, color: bool) -> String {
    let mut line = format!(
        "{} {} [{}]",
        record.timestamp.format("%H:%M:%S"),
        level_tag(record.level, color),
        record.job
    );
    if let Some(host) = record.host {
        line.push_str(&format!(" ({host})"));
    }
    line.push(' ');
    line.push_str(&record.event);
    for (key, value) in &record.context {
        line.push(' ');
        line.push_str(key);
        line.push('=');
        line.push_str(&render_value(value));
    }
    line
}

/// `[job] 42% (3/7) label`, or `[job] … label` for heartbeats.
pub fn render_progress(progress: &ProgressEvent, color: bool) -> String {
    let update = &progress.update;
    let mut line = format!("[{}]", progress.job);
    if let Some(host) = progress.host {
        line.push_str(&format!(" ({host})"));
    }
    match (update.percent, update.heartbeat) {
        (Some(pct), _) => {
            let pct = format!("{pct:>3}%");
            line.push(' ');
            line.push_str(&if color { pct.cyan().to_string() } else { pct });
        }
        (None, true) => line.push_str(" …"),
        (None, false) => {}
    }
    if let (Some(current), Some(total)) = (update.current, update.total) {
        line.push_str(&format!(" ({current}/{total})"));
    }
    if let Some(label) = &update.label {
        line.push(' ');
        line.push_str(label);
    }
    line
}

fn level_tag(level: Level, color: bool) -> String {
    let tag = format!("{:<8}", level.as_str());
    if !color {
        return tag;
    }
    let colored: ColoredString = match level {
        Level::Debug => tag.dimmed(),
        Level::Full => tag.blue(),
        Level::Info => tag.green(),
        Level::Warning => tag.yellow().bold(),
        Level::Error => tag.red().bold(),
        Level::Critical => tag.white().on_red().bold(),
    };
    colored.to_string()
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) if s.contains(char::is_whitespace) => format!("{s:?}"),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostsync_core::{HostRole, ProgressUpdate};
    use serde_json::json;

    #[test]
    fn plain_record_includes_job_host_and_context() {
        let mut record = LogRecord::new(Level::Warning, "disk_space_monitor", "free space low");
        record.host = Some(HostRole::Target);
        record.context.insert("free".into(), json!("12.0GiB"));
        record.context.insert("note".into(), json!("two words"));
        let line = render_record(&record, false);
        assert!(line.contains("WARNING  [disk_space_monitor] (target) free space low"), "{line}");
        assert!(line.ends_with("free=12.0GiB note=\"two words\""), "{line}");
    }

    #[test]
    fn progress_renders_percent_and_counter() {
        let event = ProgressEvent {
            job: "dummy_success".into(),
            host: Some(HostRole::Source),
            update: ProgressUpdate::counter(3, 4).with_label("step 3"),
        };
        assert_eq!(render_progress(&event, false), "[dummy_success] (source)  75% (3/4) step 3");
    }

    #[test]
    fn heartbeat_renders_ellipsis() {
        let event = ProgressEvent {
            job: "btrfs_snapshots_pre".into(),
            host: None,
            update: ProgressUpdate::heartbeat(),
        };
        assert_eq!(render_progress(&event, false), "[btrfs_snapshots_pre] …");
    }
}
