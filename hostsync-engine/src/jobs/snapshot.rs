//! Pre- and post-run btrfs snapshots on both hosts.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use hostsync_core::{ConfigError, ConfigSchema, FieldType, HostRole, ProgressUpdate, Snapshot, SnapshotPhase};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_yaml::Value;
use tokio_util::sync::CancellationToken;

use crate::btrfs::{self, Btrfs};
use crate::error::{JobError, ValidationError};
use crate::job::{typed_config, Job, JobContext, JobKind};

pub const PRE_NAME: &str = "btrfs_snapshots_pre";
pub const POST_NAME: &str = "btrfs_snapshots_post";
pub const SECTION: &str = "btrfs_snapshots";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotConfig {
    pub subvolumes: Vec<String>,
    pub snapshot_dir: PathBuf,
    pub keep_recent: usize,
    pub max_age_days: u32,
    pub sudo: bool,
}

pub fn schema() -> ConfigSchema {
    ConfigSchema::empty()
        .optional(
            "subvolumes",
            FieldType::StringList,
            vec!["@".to_owned(), "@home".to_owned()],
            "subvolumes to snapshot ('@' is /, '@name' is /name)",
        )
        .optional("snapshot_dir", FieldType::String, "/.snapshots", "btrfs subvolume holding snapshots")
        .optional("keep_recent", FieldType::integer(1, 1000), 3, "run groups kept by cleanup")
        .optional("max_age_days", FieldType::integer(0, 36500), 7, "age after which cleanup may delete")
        .optional("sudo", FieldType::Bool, true, "prefix btrfs commands with sudo -n")
}

pub struct SnapshotJob {
    phase: SnapshotPhase,
    config: SnapshotConfig,
    created: Mutex<Vec<Snapshot>>,
}

impl SnapshotJob {
    pub fn new(phase: SnapshotPhase, config: SnapshotConfig) -> Self {
        Self {
            phase,
            config,
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn pre(raw: &Value) -> Result<Arc<dyn Job>, ConfigError> {
        Ok(Arc::new(Self::new(SnapshotPhase::Pre, typed_config(SECTION, raw)?)))
    }

    pub fn post(raw: &Value) -> Result<Arc<dyn Job>, ConfigError> {
        Ok(Arc::new(Self::new(SnapshotPhase::Post, typed_config(SECTION, raw)?)))
    }

    fn btrfs(&self) -> Btrfs {
        Btrfs {
            sudo: self.config.sudo,
        }
    }

    async fn validate_host(&self, ctx: &JobContext, host: HostRole) -> Vec<ValidationError> {
        let exec = ctx.executor(host);
        let btrfs = self.btrfs();
        let mut errors = Vec::new();
        let mut report = |message: String| errors.push(ValidationError::new(self.name(), Some(host), message));

        for subvolume in &self.config.subvolumes {
            let mount = match btrfs::mount_point(subvolume) {
                Ok(mount) => mount,
                Err(message) => {
                    report(message);
                    continue;
                }
            };
            match exec.run_command(&btrfs.show(&mount), ctx.command_timeout).await {
                Ok(result) if result.success() => {}
                Ok(_) => report(format!(
                    "subvolume {subvolume} ({}) does not exist or is not a btrfs subvolume",
                    mount.display()
                )),
                Err(e) => report(format!("cannot inspect {subvolume}: {e}")),
            }
        }

        let dir = &self.config.snapshot_dir;
        match exec.run_command(&btrfs::dir_exists(dir), ctx.command_timeout).await {
            Ok(exists) if exists.success() => {
                match exec.run_command(&btrfs.show(dir), ctx.command_timeout).await {
                    Ok(result) if result.success() => {}
                    Ok(_) => report(format!(
                        "snapshot dir {} is a plain directory, not a btrfs subvolume",
                        dir.display()
                    )),
                    Err(e) => report(format!("cannot inspect {}: {e}", dir.display())),
                }
            }
            // Missing: created as a subvolume during execute.
            Ok(_) => {}
            Err(e) => report(format!("cannot inspect {}: {e}", dir.display())),
        }
        errors
    }

    async fn snapshot_host(
        &self,
        ctx: &JobContext,
        host: HostRole,
        cancel: &CancellationToken,
        done: &mut u64,
        total: u64,
    ) -> Result<(), JobError> {
        let exec = ctx.executor(host);
        let log = ctx.log.on_host(host);
        let btrfs = self.btrfs();
        let timeout = ctx.command_timeout;
        let dir = &self.config.snapshot_dir;

        let exists = exec.run_command(&btrfs::dir_exists(dir), timeout).await?;
        if !exists.success() {
            let create = btrfs.create_subvolume(dir);
            log.info(format!("creating snapshot subvolume {}", dir.display()));
            let result = exec.run_command(&create, timeout).await?;
            if !result.success() {
                return Err(JobError::command(&create, &result));
            }
        }

        let group = btrfs::run_group_dir(dir, ctx.run_started, &ctx.session);
        let mkdir = btrfs.mkdir_p(&group);
        let result = exec.run_command(&mkdir, timeout).await?;
        if !result.success() {
            return Err(JobError::command(&mkdir, &result));
        }

        for subvolume in &self.config.subvolumes {
            if cancel.is_cancelled() {
                log.warning("cancelled between snapshots");
                return Err(JobError::Cancelled);
            }
            let mount = btrfs::mount_point(subvolume).map_err(JobError::Failed)?;
            let taken_at = Utc::now();
            let dest = group.join(btrfs::snapshot_name(self.phase, subvolume, taken_at));
            let command = btrfs.snapshot_read_only(&mount, &dest);
            let result = exec.run_command(&command, timeout).await?;
            if !result.success() {
                return Err(JobError::command(&command, &result));
            }

            log.event(hostsync_core::Level::Full, "snapshot created")
                .with("subvolume", subvolume)
                .with("path", dest.display().to_string())
                .send();
            self.created.lock().push(Snapshot {
                path: dest,
                subvolume: subvolume.clone(),
                read_only: true,
                created_at: taken_at,
                parent: None,
                host,
                phase: self.phase,
            });
            *done += 1;
            ctx.log
                .progress(ProgressUpdate::counter(*done, total).with_label(format!("{host} {subvolume}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Job for SnapshotJob {
    fn name(&self) -> &str {
        match self.phase {
            SnapshotPhase::Pre => PRE_NAME,
            SnapshotPhase::Post => POST_NAME,
        }
    }

    fn kind(&self) -> JobKind {
        JobKind::System
    }

    async fn validate(&self, ctx: &JobContext) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.config.subvolumes.is_empty() {
            errors.push(ValidationError::new(self.name(), None, "no subvolumes configured"));
        }
        for host in [HostRole::Source, HostRole::Target] {
            errors.extend(self.validate_host(ctx, host).await);
        }
        errors
    }

    async fn execute(&self, ctx: &JobContext, cancel: &CancellationToken) -> Result<(), JobError> {
        let total = (self.config.subvolumes.len() * 2) as u64;
        let mut done = 0;
        ctx.log.info(format!(
            "taking {} snapshots of {} on both hosts",
            self.phase,
            self.config.subvolumes.join(", ")
        ));
        for host in [HostRole::Source, HostRole::Target] {
            self.snapshot_host(ctx, host, cancel, &mut done, total).await?;
        }
        ctx.log
            .event(hostsync_core::Level::Info, format!("{} snapshots complete", self.phase))
            .with("count", done)
            .send();
        Ok(())
    }

    fn snapshots(&self) -> Vec<Snapshot> {
        self.created.lock().clone()
    }
}
