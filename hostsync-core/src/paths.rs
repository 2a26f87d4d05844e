//! Filesystem locations used by hostsync.
//!
//! ```text
//! <config>/hostsync/config.yaml
//! <data>/hostsync/logs/sync-<YYYYMMDDTHHMMSS>-<session>.log
//! <state>/hostsync/run.lock
//! <runtime>/hostsync/ssh/           (ssh ControlMaster sockets)
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{io_err, ConfigError};
use crate::types::SessionId;

pub const APP_DIR: &str = "hostsync";
pub const CONFIG_FILE: &str = "config.yaml";
pub const LOCK_FILE: &str = "run.lock";
pub const LOG_PREFIX: &str = "sync-";
pub const LOG_SUFFIX: &str = ".log";

/// Timestamp format shared by log file names and snapshot names.
pub const STAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Base directories; every path helper hangs off one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirs {
    pub config: PathBuf,
    pub data: PathBuf,
    pub state: PathBuf,
    pub runtime: PathBuf,
}

impl Dirs {
    /// Resolve the platform directories via `dirs`.
    pub fn discover() -> Result<Self, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        let config = dirs::config_dir().unwrap_or_else(|| home.join(".config"));
        let data = dirs::data_dir().unwrap_or_else(|| home.join(".local").join("share"));
        let state = dirs::state_dir().unwrap_or_else(|| data.clone());
        let runtime = dirs::runtime_dir().unwrap_or_else(std::env::temp_dir);
        Ok(Self {
            config,
            data,
            state,
            runtime,
        })
    }

    /// All four roots under one directory. Used by tests.
    pub fn under(root: &Path) -> Self {
        Self {
            config: root.join("config"),
            data: root.join("data"),
            state: root.join("state"),
            runtime: root.join("run"),
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config.join(APP_DIR).join(CONFIG_FILE)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data.join(APP_DIR).join("logs")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.state.join(APP_DIR).join(LOCK_FILE)
    }

    pub fn ssh_control_dir(&self) -> PathBuf {
        self.runtime.join(APP_DIR).join("ssh")
    }

    /// `<logs>/sync-<YYYYMMDDTHHMMSS>-<session>.log`. Pure, no I/O.
    pub fn run_log_file(&self, started_at: DateTime<Utc>, session: &SessionId) -> PathBuf {
        self.logs_dir().join(format!(
            "{LOG_PREFIX}{}-{session}{LOG_SUFFIX}",
            started_at.format(STAMP_FORMAT)
        ))
    }

    /// Newest run log by file name (names sort chronologically).
    pub fn latest_run_log(&self) -> Result<Option<PathBuf>, ConfigError> {
        let dir = self.logs_dir();
        if !dir.exists() {
            return Ok(None);
        }
        let mut logs: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map_err(|e| io_err(&dir, e))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(LOG_PREFIX) && n.ends_with(LOG_SUFFIX))
                    .unwrap_or(false)
            })
            .collect();
        logs.sort();
        Ok(logs.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn run_log_file_is_keyed_by_timestamp_and_session() {
        let dirs = Dirs::under(Path::new("/root"));
        let started = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let path = dirs.run_log_file(started, &SessionId::from("ab12cd34"));
        assert_eq!(
            path,
            PathBuf::from("/root/data/hostsync/logs/sync-20260304T050607-ab12cd34.log")
        );
    }

    #[test]
    fn latest_run_log_picks_newest_name() {
        let root = TempDir::new().unwrap();
        let dirs = Dirs::under(root.path());
        assert_eq!(dirs.latest_run_log().unwrap(), None);

        std::fs::create_dir_all(dirs.logs_dir()).unwrap();
        for name in [
            "sync-20260101T000000-aaaaaaaa.log",
            "sync-20260301T000000-cccccccc.log",
            "sync-20260201T000000-bbbbbbbb.log",
            "notes.txt",
        ] {
            std::fs::write(dirs.logs_dir().join(name), "").unwrap();
        }
        let latest = dirs.latest_run_log().unwrap().unwrap();
        assert!(latest.ends_with("sync-20260301T000000-cccccccc.log"));
    }
}
