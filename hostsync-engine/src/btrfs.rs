//! btrfs naming and command construction.
//!
//! Layout under the snapshot directory (itself a subvolume):
//!
//! ```text
//! <snapshot_dir>/hostsync/<run_ts>-<session>/<phase>-<subvol>-<ts>
//! ```
//!
//! Everything outside `hostsync/`, and anything named `baseline*`, belongs
//! to the operator and is never touched.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use hostsync_core::paths::STAMP_FORMAT;
use hostsync_core::{SessionId, SnapshotPhase};
use hostsync_exec::shell_quote;

pub const RUN_DIR: &str = "hostsync";
pub const BASELINE_PREFIX: &str = "baseline";

/// Mount point for a subvolume identifier: `@` is `/`, `@name` is `/name`.
pub fn mount_point(subvolume: &str) -> Result<PathBuf, String> {
    match subvolume.strip_prefix('@') {
        Some("") => Ok(PathBuf::from("/")),
        Some(rest) if !rest.starts_with('/') && !rest.contains("..") => {
            Ok(PathBuf::from("/").join(rest))
        }
        _ => Err(format!(
            "subvolume '{subvolume}' must be '@' or '@<name>'"
        )),
    }
}

/// Directory holding every snapshot of one run.
pub fn run_group_name(run_started: DateTime<Utc>, session: &SessionId) -> String {
    format!("{}-{session}", run_started.format(STAMP_FORMAT))
}

pub fn run_group_dir(snapshot_dir: &Path, run_started: DateTime<Utc>, session: &SessionId) -> PathBuf {
    snapshot_dir.join(RUN_DIR).join(run_group_name(run_started, session))
}

/// `<phase>-<subvol>-<ts>`; nested subvolume names have `/` replaced.
pub fn snapshot_name(phase: SnapshotPhase, subvolume: &str, taken_at: DateTime<Utc>) -> String {
    format!(
        "{phase}-{}-{}",
        subvolume.replace('/', "_"),
        taken_at.format(STAMP_FORMAT)
    )
}

/// Timestamp encoded in a run group directory name.
pub fn parse_group_time(group: &str) -> Option<DateTime<Utc>> {
    let (stamp, session) = group.split_once('-')?;
    if session.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

pub fn is_baseline(name: &str) -> bool {
    name.starts_with(BASELINE_PREFIX)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Builds shell commands, optionally prefixed with non-interactive sudo.
#[derive(Debug, Clone, Copy)]
pub struct Btrfs {
    pub sudo: bool,
}

impl Btrfs {
    fn privileged(&self, command: String) -> String {
        if self.sudo {
            format!("sudo -n {command}")
        } else {
            command
        }
    }

    pub fn show(&self, path: &Path) -> String {
        self.privileged(format!("btrfs subvolume show {}", quote_path(path)))
    }

    pub fn create_subvolume(&self, path: &Path) -> String {
        self.privileged(format!("btrfs subvolume create {}", quote_path(path)))
    }

    pub fn snapshot_read_only(&self, source: &Path, dest: &Path) -> String {
        self.privileged(format!(
            "btrfs subvolume snapshot -r {} {}",
            quote_path(source),
            quote_path(dest)
        ))
    }

    pub fn delete_subvolume(&self, path: &Path) -> String {
        self.privileged(format!("btrfs subvolume delete {}", quote_path(path)))
    }

    pub fn mkdir_p(&self, path: &Path) -> String {
        self.privileged(format!("mkdir -p {}", quote_path(path)))
    }

    pub fn rmdir(&self, path: &Path) -> String {
        self.privileged(format!("rmdir {}", quote_path(path)))
    }
}

pub fn dir_exists(path: &Path) -> String {
    format!("test -d {}", quote_path(path))
}

/// One entry per line; missing directory yields empty output.
pub fn list_dir(path: &Path) -> String {
    format!("ls -1 {} 2>/dev/null || true", quote_path(path))
}

pub fn quote_path(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("@", "/")]
    #[case("@home", "/home")]
    #[case("@var/log", "/var/log")]
    fn mount_points(#[case] subvolume: &str, #[case] expected: &str) {
        assert_eq!(mount_point(subvolume).unwrap(), PathBuf::from(expected));
    }

    #[rstest]
    #[case("home")]
    #[case("@/etc")]
    #[case("@../x")]
    fn rejected_subvolumes(#[case] subvolume: &str) {
        assert!(mount_point(subvolume).is_err());
    }

    #[test]
    fn snapshot_paths_group_by_run() {
        let started = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        let taken = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 7).unwrap();
        let session = SessionId::from("ab12cd34");
        let group = run_group_dir(Path::new("/.snapshots"), started, &session);
        assert_eq!(group, PathBuf::from("/.snapshots/hostsync/20260501T120000-ab12cd34"));
        assert_eq!(
            snapshot_name(SnapshotPhase::Pre, "@home", taken),
            "pre-@home-20260501T120007"
        );
        assert_eq!(parse_group_time("20260501T120000-ab12cd34"), Some(started));
        assert_eq!(parse_group_time("baseline-2025"), None);
    }

    #[test]
    fn sudo_prefix_is_optional() {
        let path = Path::new("/.snapshots");
        assert_eq!(Btrfs { sudo: true }.show(path), "sudo -n btrfs subvolume show /.snapshots");
        assert_eq!(Btrfs { sudo: false }.show(path), "btrfs subvolume show /.snapshots");
    }
}
