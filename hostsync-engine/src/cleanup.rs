//! Operator-invoked retention for run snapshot groups.
//!
//! Only directories directly under `<snapshot_dir>/hostsync/` whose names
//! parse as run groups are considered. The newest `keep_recent` groups are
//! always kept; older ones are deleted when they also exceed the age limit
//! (or unconditionally when no limit is set).

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use hostsync_core::{ConfigError, Configuration, HostRole};
use hostsync_exec::Executor;
use hostsync_log::Logger;

use crate::btrfs::{self, Btrfs};
use crate::error::JobError;
use crate::job::typed_config;
use crate::jobs::snapshot::{self, SnapshotConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_recent: usize,
    /// `None` deletes every group beyond the most recent ones.
    pub max_age_days: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    KeepRecent,
    KeepYoung,
    Delete,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::KeepRecent => write!(f, "keep (recent)"),
            Verdict::KeepYoung => write!(f, "keep (within age limit)"),
            Verdict::Delete => write!(f, "delete"),
        }
    }
}

/// A run group found on a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotGroup {
    pub name: String,
    pub started: DateTime<Utc>,
}

/// Decide each group's fate, newest first.
pub fn decide(mut groups: Vec<SnapshotGroup>, policy: RetentionPolicy, now: DateTime<Utc>) -> Vec<(SnapshotGroup, Verdict)> {
    groups.sort_by(|a, b| b.started.cmp(&a.started).then_with(|| b.name.cmp(&a.name)));
    groups
        .into_iter()
        .enumerate()
        .map(|(rank, group)| {
            let verdict = if rank < policy.keep_recent {
                Verdict::KeepRecent
            } else {
                match policy.max_age_days {
                    Some(days) if now - group.started <= Duration::days(i64::from(days)) => Verdict::KeepYoung,
                    _ => Verdict::Delete,
                }
            };
            (group, verdict)
        })
        .collect()
}

/// Group names from an `ls -1` listing. Baselines and foreign entries are
/// dropped.
pub fn parse_groups(listing: &str) -> Vec<SnapshotGroup> {
    listing
        .lines()
        .map(str::trim)
        .filter(|name| !name.is_empty() && !btrfs::is_baseline(name))
        .filter_map(|name| {
            btrfs::parse_group_time(name).map(|started| SnapshotGroup {
                name: name.to_owned(),
                started,
            })
        })
        .collect()
}

/// One row of the cleanup report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupEntry {
    pub host: HostRole,
    pub group: String,
    pub started: DateTime<Utc>,
    pub verdict: Verdict,
    /// What was done: `kept`, `deleted`, `would delete`, or the failure.
    pub outcome: String,
}

pub struct SnapshotCleanup {
    btrfs: Btrfs,
    snapshot_dir: PathBuf,
    policy: RetentionPolicy,
    dry_run: bool,
}

impl SnapshotCleanup {
    pub fn new(config: &SnapshotConfig, policy: RetentionPolicy, dry_run: bool) -> Self {
        Self {
            btrfs: Btrfs { sudo: config.sudo },
            snapshot_dir: config.snapshot_dir.clone(),
            policy,
            dry_run,
        }
    }

    /// Policy from the `btrfs_snapshots` section; flags override it.
    /// A configured age of zero means no age limit.
    pub fn from_config(
        config: &Configuration,
        keep_recent: Option<usize>,
        max_age_days: Option<u32>,
        dry_run: bool,
    ) -> Result<Self, ConfigError> {
        let raw = config.section(snapshot::SECTION);
        let schema = snapshot::schema();
        if let Some(error) = schema.validate(snapshot::SECTION, raw).into_iter().next() {
            return Err(error);
        }
        let section: SnapshotConfig = typed_config(snapshot::SECTION, &schema.with_defaults(raw))?;
        let policy = RetentionPolicy {
            keep_recent: keep_recent.unwrap_or(section.keep_recent),
            max_age_days: max_age_days.or(Some(section.max_age_days)).filter(|days| *days > 0),
        };
        Ok(Self::new(&section, policy, dry_run))
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    fn run_dir(&self) -> PathBuf {
        self.snapshot_dir.join(btrfs::RUN_DIR)
    }

    /// Apply the policy on one host.
    pub async fn run(
        &self,
        exec: &dyn Executor,
        log: &Logger,
        now: DateTime<Utc>,
    ) -> Result<Vec<CleanupEntry>, JobError> {
        let host = exec.role();
        let log = log.on_host(host);
        let run_dir = self.run_dir();
        let listing = exec.run_command(&btrfs::list_dir(&run_dir), None).await?;
        let groups = parse_groups(&listing.stdout);
        log.event(hostsync_core::Level::Full, "snapshot groups found")
            .with("dir", run_dir.display().to_string())
            .with("count", groups.len())
            .send();

        let mut entries = Vec::new();
        for (group, verdict) in decide(groups, self.policy, now) {
            let outcome = match verdict {
                Verdict::KeepRecent | Verdict::KeepYoung => "kept".to_owned(),
                Verdict::Delete if self.dry_run => "would delete".to_owned(),
                Verdict::Delete => match self.delete_group(exec, &group.name).await {
                    Ok(count) => {
                        log.info(format!("deleted {} ({count} snapshots)", group.name));
                        "deleted".to_owned()
                    }
                    Err(e) => {
                        log.error(format!("failed to delete {}: {e}", group.name));
                        format!("failed: {e}")
                    }
                },
            };
            entries.push(CleanupEntry {
                host,
                group: group.name,
                started: group.started,
                verdict,
                outcome,
            });
        }
        Ok(entries)
    }

    /// Delete every snapshot in a group, then the group directory.
    async fn delete_group(&self, exec: &dyn Executor, group: &str) -> Result<usize, JobError> {
        let dir = self.run_dir().join(group);
        let listing = exec.run_command(&btrfs::list_dir(&dir), None).await?;
        let mut deleted = 0;
        for name in listing.stdout.lines().map(str::trim).filter(|n| !n.is_empty()) {
            if btrfs::is_baseline(name) {
                continue;
            }
            let command = self.btrfs.delete_subvolume(&dir.join(name));
            let result = exec.run_command(&command, None).await?;
            if !result.success() {
                return Err(JobError::command(&command, &result));
            }
            deleted += 1;
        }
        let command = self.btrfs.rmdir(&dir);
        let result = exec.run_command(&command, None).await?;
        if !result.success() {
            return Err(JobError::command(&command, &result));
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hostsync_exec::{FakeExecutor, FakeResponse};

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, day, 12, 0, 0).unwrap()
    }

    fn group(day: u32) -> SnapshotGroup {
        SnapshotGroup {
            name: format!("202605{day:02}T120000-s{day}"),
            started: at(day),
        }
    }

    #[test]
    fn keeps_most_recent_then_applies_age() {
        let groups = vec![group(1), group(9), group(5), group(8), group(10)];
        let policy = RetentionPolicy {
            keep_recent: 2,
            max_age_days: Some(3),
        };
        let verdicts: Vec<(u32, Verdict)> = decide(groups, policy, at(11))
            .into_iter()
            .map(|(g, v)| (g.started.format("%d").to_string().parse().unwrap(), v))
            .collect();
        assert_eq!(
            verdicts,
            vec![
                (10, Verdict::KeepRecent),
                (9, Verdict::KeepRecent),
                (8, Verdict::KeepYoung),
                (5, Verdict::Delete),
                (1, Verdict::Delete),
            ]
        );
    }

    #[test]
    fn without_age_limit_everything_beyond_recent_goes() {
        let policy = RetentionPolicy {
            keep_recent: 1,
            max_age_days: None,
        };
        let verdicts: Vec<Verdict> = decide(vec![group(2), group(3)], policy, at(3))
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        assert_eq!(verdicts, vec![Verdict::KeepRecent, Verdict::Delete]);
    }

    #[test]
    fn listing_skips_baselines_and_foreign_entries() {
        let listing = "20260501T120000-aa\nbaseline-20260101T000000-x\nnotes.txt\n\n20260502T120000-bb\n";
        let names: Vec<String> = parse_groups(listing).into_iter().map(|g| g.name).collect();
        assert_eq!(names, vec!["20260501T120000-aa", "20260502T120000-bb"]);
    }

    fn cleanup(dry_run: bool) -> SnapshotCleanup {
        let config = SnapshotConfig {
            subvolumes: vec!["@".into()],
            snapshot_dir: PathBuf::from("/.snapshots"),
            keep_recent: 1,
            max_age_days: 0,
            sudo: false,
        };
        SnapshotCleanup::new(
            &config,
            RetentionPolicy {
                keep_recent: 1,
                max_age_days: None,
            },
            dry_run,
        )
    }

    fn fake_with_groups() -> FakeExecutor {
        let fake = FakeExecutor::new(HostRole::Source, "src");
        fake.on(
            "ls -1 /.snapshots/hostsync 2>",
            FakeResponse::ok("20260501T120000-aa\n20260502T120000-bb\nbaseline-keep\n"),
        );
        fake.on(
            "ls -1 /.snapshots/hostsync/20260501T120000-aa",
            FakeResponse::ok("pre-@-20260501T120001\npost-@-20260501T121000\n"),
        );
        fake
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let fake = fake_with_groups();
        let entries = cleanup(true)
            .run(&fake, &Logger::detached("cleanup"), at(20))
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].outcome, "would delete");
        assert!(!fake.ran("subvolume delete"));
        assert!(!fake.ran("rmdir"));
    }

    #[tokio::test]
    async fn deletes_old_group_contents_then_directory() {
        let fake = fake_with_groups();
        let entries = cleanup(false)
            .run(&fake, &Logger::detached("cleanup"), at(20))
            .await
            .unwrap();
        assert_eq!(entries[0].group, "20260502T120000-bb");
        assert_eq!(entries[0].outcome, "kept");
        assert_eq!(entries[1].outcome, "deleted");

        let ran = fake.calls();
        let deletes: Vec<&String> = ran.iter().filter(|c| c.contains("subvolume delete")).collect();
        assert_eq!(deletes.len(), 2);
        assert!(deletes.iter().all(|c| c.contains("20260501T120000-aa")));
        assert_eq!(
            ran.last().map(String::as_str),
            Some("rmdir /.snapshots/hostsync/20260501T120000-aa")
        );
        assert!(!ran.iter().any(|c| c.contains("baseline")));
    }
}
