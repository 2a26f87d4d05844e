//! Run configuration loaded from `<config_dir>/hostsync/config.yaml`.
//!
//! # API pattern
//!
//! As with every file-backed loader in this workspace, each function comes
//! in two forms: `fn_at(path, …)` with an explicit path (used by tests with
//! `TempDir`) and a convenience form that derives the path from [`Dirs`].
//!
//! Only the global sections (`logging`, `sync_jobs`, `orchestrator`) are
//! typed here. Every other top-level section is a job's raw config, kept as
//! a `serde_yaml::Value` and checked against that job's schema later.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::{io_err, ConfigError};
use crate::paths::Dirs;
use crate::types::Level;

/// Top-level keys owned by the configuration itself rather than a job.
pub const GLOBAL_SECTIONS: [&str; 3] = ["logging", "sync_jobs", "orchestrator"];

/// Severity floors for the two sinks plus the shared third-party floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_file_level")]
    pub file: Level,
    #[serde(default = "default_tui_level")]
    pub tui: Level,
    #[serde(default = "default_external_level")]
    pub external: Level,
}

fn default_file_level() -> Level {
    Level::Debug
}
fn default_tui_level() -> Level {
    Level::Info
}
fn default_external_level() -> Level {
    Level::Warning
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: default_file_level(),
            tui: default_tui_level(),
            external: default_external_level(),
        }
    }
}

/// Orchestrator timing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Seconds a cancelled job gets to clean up before forced termination.
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,
    /// Delay before the single reconnection attempt after connection loss.
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_ms: u64,
    /// Default timeout for one-shot commands issued by system jobs.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_grace_period() -> u64 {
    10
}
fn default_reconnect_backoff() -> u64 {
    2_000
}
fn default_command_timeout() -> u64 {
    600
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period(),
            reconnect_backoff_ms: default_reconnect_backoff(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

/// One entry of the ordered `sync_jobs` mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncJobEntry {
    pub name: String,
    pub enabled: bool,
}

/// Parsed configuration file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Configuration {
    pub logging: LoggingConfig,
    pub orchestrator: OrchestratorConfig,
    /// `sync_jobs` in file order. Order is authoritative for sequencing.
    pub sync_jobs: Vec<SyncJobEntry>,
    sections: BTreeMap<String, Value>,
}

impl Configuration {
    /// Parse configuration text. `origin` is only used in error messages.
    pub fn from_yaml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let root: Value = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;

        let map = match root {
            Value::Null => return Ok(Self::default()),
            Value::Mapping(map) => map,
            _ => {
                return Err(ConfigError::NotAMapping {
                    section: "<root>".into(),
                })
            }
        };

        let mut config = Configuration::default();
        for (key, value) in map {
            let Some(key) = key.as_str().map(str::to_owned) else {
                return Err(ConfigError::InvalidType {
                    section: "<root>".into(),
                    key: format!("{key:?}"),
                    expected: "a string key".into(),
                });
            };
            match key.as_str() {
                "logging" => config.logging = typed_section(&key, value, origin)?,
                "orchestrator" => config.orchestrator = typed_section(&key, value, origin)?,
                "sync_jobs" => config.sync_jobs = parse_sync_jobs(value)?,
                _ => {
                    config.sections.insert(key, value);
                }
            }
        }
        Ok(config)
    }

    /// Load configuration from an explicit path.
    pub fn load_at(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let text = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        Self::from_yaml_str(&text, path)
    }

    /// `load_at` convenience wrapper using the user's config directory.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_at(&Dirs::discover()?.config_file())
    }

    /// Raw config section for `name`; `Null` when the section is absent.
    pub fn section(&self, name: &str) -> &Value {
        self.sections.get(name).unwrap_or(&Value::Null)
    }

    /// Names of every non-global top-level section, sorted.
    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Enabled sync job names in configuration order.
    pub fn enabled_sync_jobs(&self) -> impl Iterator<Item = &str> {
        self.sync_jobs
            .iter()
            .filter(|entry| entry.enabled)
            .map(|entry| entry.name.as_str())
    }

    /// Replace (or add) a raw job section. Used by tests and CLI overrides.
    pub fn set_section(&mut self, name: impl Into<String>, value: Value) {
        self.sections.insert(name.into(), value);
    }
}

fn typed_section<T>(section: &str, value: Value, origin: &Path) -> Result<T, ConfigError>
where
    T: Default + serde::de::DeserializeOwned,
{
    if value.is_null() {
        return Ok(T::default());
    }
    if !value.is_mapping() {
        return Err(ConfigError::NotAMapping {
            section: section.to_owned(),
        });
    }
    serde_yaml::from_value(value).map_err(|source| ConfigError::Parse {
        path: origin.to_path_buf(),
        source,
    })
}

fn parse_sync_jobs(value: Value) -> Result<Vec<SyncJobEntry>, ConfigError> {
    let map = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Mapping(map) => map,
        _ => {
            return Err(ConfigError::NotAMapping {
                section: "sync_jobs".into(),
            })
        }
    };
    let mut entries = Vec::with_capacity(map.len());
    for (key, enabled) in map {
        let name = key.as_str().map(str::to_owned).ok_or_else(|| ConfigError::InvalidType {
            section: "sync_jobs".into(),
            key: format!("{key:?}"),
            expected: "a job name".into(),
        })?;
        let enabled = enabled.as_bool().ok_or_else(|| ConfigError::InvalidType {
            section: "sync_jobs".into(),
            key: name.clone(),
            expected: "true or false".into(),
        })?;
        entries.push(SyncJobEntry { name, enabled });
    }
    Ok(entries)
}

/// Commented default configuration written by `hostsync init`.
pub const DEFAULT_CONFIG: &str = r#"# hostsync configuration
#
# Levels: DEBUG, FULL, INFO, WARNING, ERROR, CRITICAL
logging:
  file: DEBUG        # floor for the per-run log file
  tui: INFO          # floor for the console
  external: WARNING  # extra floor for third-party library output

# Sync jobs run in the order listed here. Set to false to disable.
sync_jobs:
  dummy_success: true
  dummy_fail: false

orchestrator:
  grace_period_secs: 10
  reconnect_backoff_ms: 2000
  command_timeout_secs: 600

disk_space_monitor:
  preflight_minimum: "20%"
  runtime_minimum: "15%"
  warning_threshold: "25%"
  check_interval: 30
  mount_point: "/"

btrfs_snapshots:
  subvolumes: ["@", "@home"]
  snapshot_dir: "/.snapshots"
  keep_recent: 3
  max_age_days: 7
  sudo: true

install:
  command: "curl -LsSf https://github.com/hostsync/hostsync/releases/download/v{version}/install.sh | sh -s -- --version {version}"

dummy_success:
  source_duration: 20
  target_duration: 20

dummy_fail:
  fail_at_percent: 60
  duration: 10
"#;

/// Write [`DEFAULT_CONFIG`] to `path` unless a file already exists there.
///
/// Returns `true` when a new file was written.
pub fn write_default_at(path: &Path) -> Result<bool, ConfigError> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, DEFAULT_CONFIG).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(true)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
