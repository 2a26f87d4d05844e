//! Version reconciliation: make the target run exactly our version.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use hostsync_core::{ConfigError, ConfigSchema, FieldType, HostRole, Version};
use serde::Deserialize;
use serde_yaml::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{JobError, ValidationError};
use crate::job::{typed_config, Job, JobContext, JobKind};

pub const NAME: &str = "install_on_target";
pub const SECTION: &str = "install";
const VERSION_PLACEHOLDER: &str = "{version}";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstallConfig {
    /// Install/upgrade command; `{version}` is replaced with our version.
    pub command: String,
    pub version_command: String,
}

pub fn schema() -> ConfigSchema {
    ConfigSchema::empty()
        .optional(
            "command",
            FieldType::String,
            "hostsync-install --version {version}",
            "install command run on the target",
        )
        .optional(
            "version_command",
            FieldType::String,
            "hostsync --version",
            "prints the installed version on the target",
        )
}

/// What the target needs, given its installed version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    Install,
    Upgrade(Version),
    UpToDate,
    /// The target is ahead of us; never downgrade a peer.
    TargetNewer(Version),
}

pub fn reconcile(ours: Version, theirs: Option<Version>) -> Reconcile {
    match theirs {
        None => Reconcile::Install,
        Some(theirs) => match theirs.cmp(&ours) {
            Ordering::Less => Reconcile::Upgrade(theirs),
            Ordering::Equal => Reconcile::UpToDate,
            Ordering::Greater => Reconcile::TargetNewer(theirs),
        },
    }
}

/// Version from `hostsync --version` output (`hostsync 1.2.3`).
pub fn parse_version_output(stdout: &str) -> Option<Version> {
    stdout
        .lines()
        .next()?
        .split_whitespace()
        .last()?
        .parse()
        .ok()
}

pub struct InstallJob {
    config: InstallConfig,
}

impl InstallJob {
    pub fn new(config: InstallConfig) -> Self {
        Self { config }
    }

    pub fn create(raw: &Value) -> Result<Arc<dyn Job>, ConfigError> {
        Ok(Arc::new(Self::new(typed_config(SECTION, raw)?)))
    }

    async fn installed_version(&self, ctx: &JobContext) -> Result<Option<Version>, JobError> {
        let result = ctx
            .target
            .run_command(&self.config.version_command, ctx.command_timeout)
            .await?;
        if !result.success() {
            return Ok(None);
        }
        Ok(parse_version_output(&result.stdout))
    }
}

#[async_trait]
impl Job for InstallJob {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> JobKind {
        JobKind::System
    }

    async fn validate(&self, _ctx: &JobContext) -> Vec<ValidationError> {
        if self.config.command.contains(VERSION_PLACEHOLDER) {
            Vec::new()
        } else {
            vec![ValidationError::new(
                NAME,
                None,
                format!("install command must contain {VERSION_PLACEHOLDER}"),
            )]
        }
    }

    async fn execute(&self, ctx: &JobContext, cancel: &CancellationToken) -> Result<(), JobError> {
        let log = ctx.log.on_host(HostRole::Target);
        let ours = ctx.version;
        let installed = self.installed_version(ctx).await?;

        match reconcile(ours, installed) {
            Reconcile::UpToDate => {
                log.info(format!("{} already runs hostsync {ours}", ctx.target_hostname));
                return Ok(());
            }
            Reconcile::TargetNewer(theirs) => {
                return Err(JobError::failed(format!(
                    "{} runs hostsync {theirs}, newer than local {ours}; refusing to downgrade",
                    ctx.target_hostname
                )));
            }
            Reconcile::Install => log.info(format!("installing hostsync {ours} on {}", ctx.target_hostname)),
            Reconcile::Upgrade(theirs) => {
                log.info(format!("upgrading {} from {theirs} to {ours}", ctx.target_hostname))
            }
        }

        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        let command = self.config.command.replace(VERSION_PLACEHOLDER, &ours.to_string());
        let result = ctx.target.run_command(&command, ctx.command_timeout).await?;
        log.full(format!("install exited with {}", result.exit_code));
        if !result.success() {
            return Err(JobError::command(&command, &result));
        }

        match self.installed_version(ctx).await? {
            Some(now) if now == ours => {
                log.info(format!("{} now runs hostsync {ours}", ctx.target_hostname));
                Ok(())
            }
            Some(now) => Err(JobError::failed(format!(
                "after install the target reports {now}, expected {ours}"
            ))),
            None => Err(JobError::failed(
                "after install the target still reports no hostsync version",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[rstest]
    #[case(None, Reconcile::Install)]
    #[case(Some("0.9.0"), Reconcile::Upgrade(Version { major: 0, minor: 9, patch: 0 }))]
    #[case(Some("1.0.0"), Reconcile::UpToDate)]
    #[case(Some("1.2.0"), Reconcile::TargetNewer(Version { major: 1, minor: 2, patch: 0 }))]
    fn reconcile_cases(#[case] theirs: Option<&str>, #[case] expected: Reconcile) {
        assert_eq!(reconcile(v("1.0.0"), theirs.map(v)), expected);
    }

    #[rstest]
    #[case("hostsync 0.1.0\n", Some("0.1.0"))]
    #[case("v2.3.4", Some("2.3.4"))]
    #[case("", None)]
    #[case("command not found", None)]
    fn version_output(#[case] stdout: &str, #[case] expected: Option<&str>) {
        assert_eq!(parse_version_output(stdout), expected.map(v));
    }
}
