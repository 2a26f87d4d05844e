//! Domain types shared by every hostsync crate.
//!
//! Everything here is a plain value: constructed once, never mutated after
//! it leaves the function that built it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Run-unique session identifier (8 lowercase hex characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a fresh random session id.
    pub fn generate() -> Self {
        let simple = uuid::Uuid::new_v4().simple().to_string();
        Self(simple[..8].to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Six-level ordered severity scale.
///
/// `Full` sits between `Debug` and `Info`: per-file / per-command detail that
/// belongs in the log file but would flood the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Level {
    #[default]
    Debug,
    Full,
    Info,
    Warning,
    Error,
    Critical,
}

impl Level {
    pub const ALL: [Level; 6] = [
        Level::Debug,
        Level::Full,
        Level::Info,
        Level::Warning,
        Level::Error,
        Level::Critical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Full => "FULL",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        }
    }

    /// True for `Error` and `Critical`: the levels that mark a run as failed.
    pub fn is_error(self) -> bool {
        self >= Level::Error
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not one of the six level names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLevel(pub String);

impl fmt::Display for UnknownLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown log level '{}'; expected one of DEBUG, FULL, INFO, WARNING, ERROR, CRITICAL",
            self.0
        )
    }
}

impl std::error::Error for UnknownLevel {}

impl FromStr for Level {
    type Err = UnknownLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Level::Debug),
            "FULL" => Ok(Level::Full),
            "INFO" => Ok(Level::Info),
            "WARNING" | "WARN" => Ok(Level::Warning),
            "ERROR" => Ok(Level::Error),
            "CRITICAL" => Ok(Level::Critical),
            _ => Err(UnknownLevel(s.to_owned())),
        }
    }
}

impl Serialize for Level {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Hosts
// ---------------------------------------------------------------------------

/// Which side of the sync a record, command or snapshot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostRole {
    Source,
    Target,
}

impl fmt::Display for HostRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostRole::Source => write!(f, "source"),
            HostRole::Target => write!(f, "target"),
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Outcome of one finished command. A non-zero exit is data, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

// ---------------------------------------------------------------------------
// Log records and progress
// ---------------------------------------------------------------------------

/// Open key/value context attached to a record.
pub type Context = BTreeMap<String, serde_json::Value>;

/// One structured log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub job: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<HostRole>,
    pub event: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: Context,
    /// Set for records that were routed in from third-party library output.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub external: bool,
}

impl LogRecord {
    pub fn new(level: Level, job: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            job: job.into(),
            host: None,
            event: event.into(),
            context: Context::new(),
            external: false,
        }
    }
}

/// Progress report emitted by a job during `execute()`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub heartbeat: bool,
}

impl ProgressUpdate {
    /// Percent-only update, clamped to 0..=100.
    pub fn percent(percent: u8) -> Self {
        Self {
            percent: Some(percent.min(100)),
            ..Self::default()
        }
    }

    /// Counter update; percent is derived when `total` is non-zero.
    pub fn counter(current: u64, total: u64) -> Self {
        let percent = (total > 0)
            .then(|| (u128::from(current.min(total)) * 100 / u128::from(total)) as u8);
        Self {
            percent,
            current: Some(current),
            total: Some(total),
            ..Self::default()
        }
    }

    /// Liveness-only update with no numeric change.
    pub fn heartbeat() -> Self {
        Self {
            heartbeat: true,
            ..Self::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Which half of a run a snapshot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotPhase {
    Pre,
    Post,
}

impl fmt::Display for SnapshotPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotPhase::Pre => write!(f, "pre"),
            SnapshotPhase::Post => write!(f, "post"),
        }
    }
}

/// One filesystem snapshot on one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Absolute path of the snapshot subvolume.
    pub path: PathBuf,
    /// Subvolume identifier the snapshot was taken of (e.g. `@home`).
    pub subvolume: String,
    pub read_only: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<PathBuf>,
    pub host: HostRole,
    pub phase: SnapshotPhase,
}

// ---------------------------------------------------------------------------
// Run lock
// ---------------------------------------------------------------------------

/// Mutual-exclusion record persisted while a run holds the lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLock {
    /// Holder identity: `<session>@pid<pid>`.
    pub holder: String,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
    pub host: String,
}

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

/// `major.minor.patch` version; pre-release and build suffixes are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('v');
        let core = trimmed
            .split(['-', '+'])
            .next()
            .unwrap_or_default();
        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() != 3 {
            return Err(format!("invalid version '{s}': expected MAJOR.MINOR.PATCH"));
        }
        let parse = |p: &str| {
            p.parse::<u64>()
                .map_err(|_| format!("invalid version '{s}': '{p}' is not a number"))
        };
        Ok(Version {
            major: parse(parts[0])?,
            minor: parse(parts[1])?,
            patch: parse(parts[2])?,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        for pair in Level::ALL.windows(2) {
            assert!(pair[0] < pair[1], "{} should sort below {}", pair[0], pair[1]);
        }
        assert!(Level::Critical.is_error());
        assert!(!Level::Warning.is_error());
    }

    #[test]
    fn level_parse_is_case_insensitive() {
        assert_eq!("full".parse::<Level>(), Ok(Level::Full));
        assert_eq!("Warning".parse::<Level>(), Ok(Level::Warning));
        assert_eq!("warn".parse::<Level>(), Ok(Level::Warning));
        assert!("verbose".parse::<Level>().is_err());
    }

    #[test]
    fn session_id_is_eight_hex_chars() {
        let id = SessionId::generate();
        assert_eq!(id.as_str().len(), 8);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn progress_counter_derives_percent() {
        let update = ProgressUpdate::counter(3, 4);
        assert_eq!(update.percent, Some(75));
        assert_eq!(ProgressUpdate::counter(1, 0).percent, None);
        assert_eq!(ProgressUpdate::percent(250).percent, Some(100));
    }

    #[test]
    fn progress_counter_handles_byte_sized_totals() {
        assert_eq!(ProgressUpdate::counter(u64::MAX / 2, u64::MAX).percent, Some(49));
        assert_eq!(ProgressUpdate::counter(u64::MAX, u64::MAX).percent, Some(100));
    }

    #[test]
    fn version_parses_and_orders() {
        let a: Version = "0.1.0".parse().expect("parse");
        let b: Version = "v0.2.0-rc.1".parse().expect("parse");
        assert!(a < b);
        assert_eq!(b.to_string(), "0.2.0");
        assert!("1.2".parse::<Version>().is_err());
        assert!("1.x.3".parse::<Version>().is_err());
    }

    #[test]
    fn log_record_serializes_level_upper_case() {
        let record = LogRecord::new(Level::Warning, "orchestrator", "disk low");
        let json = serde_json::to_string(&record).expect("serialize");
        assert!(json.contains("\"level\":\"WARNING\""), "got: {json}");
        assert!(!json.contains("external"), "external flag omitted when false");
    }
}
