//! Free-space preflight and runtime monitor for both hosts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hostsync_core::threshold::format_bytes;
use hostsync_core::{ConfigError, ConfigSchema, FieldType, HostRole, Level, Threshold};
use serde::Deserialize;
use serde_yaml::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{JobError, ValidationError};
use crate::job::{typed_config, Job, JobContext, JobKind};

pub const NAME: &str = "disk_space_monitor";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    pub preflight_minimum: Threshold,
    pub runtime_minimum: Threshold,
    pub warning_threshold: Threshold,
    /// Seconds between samples.
    pub check_interval: u64,
    pub mount_point: String,
}

pub fn schema() -> ConfigSchema {
    ConfigSchema::empty()
        .optional("preflight_minimum", FieldType::Threshold, "20%", "free space required to start")
        .optional("runtime_minimum", FieldType::Threshold, "15%", "free space below which the run aborts")
        .optional("warning_threshold", FieldType::Threshold, "25%", "free space below which a warning is logged")
        .optional("check_interval", FieldType::integer(1, 3600), 30, "seconds between samples")
        .optional("mount_point", FieldType::String, "/", "filesystem to watch on both hosts")
}

/// One `df` reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
    pub total: u64,
    pub free: u64,
}

impl DiskUsage {
    pub fn describe(&self) -> String {
        format!("{} free of {}", format_bytes(self.free), format_bytes(self.total))
    }
}

/// Parse `df -P -B1 <mount>` output: header, then one data line.
pub fn parse_df(stdout: &str) -> Option<DiskUsage> {
    let line = stdout.lines().nth(1)?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 6 {
        return None;
    }
    Some(DiskUsage {
        total: fields[1].parse().ok()?,
        free: fields[3].parse().ok()?,
    })
}

pub struct DiskSpaceMonitor {
    config: MonitorConfig,
}

impl DiskSpaceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self { config }
    }

    pub fn create(raw: &Value) -> Result<Arc<dyn Job>, ConfigError> {
        Ok(Arc::new(Self::new(typed_config(NAME, raw)?)))
    }

    async fn sample(&self, ctx: &JobContext, host: HostRole) -> Result<DiskUsage, String> {
        let command = format!("df -P -B1 {}", hostsync_exec::shell_quote(&self.config.mount_point));
        let result = ctx
            .executor(host)
            .run_command(&command, ctx.command_timeout)
            .await
            .map_err(|e| e.to_string())?;
        if !result.success() {
            return Err(format!("'{command}' exited with {}", result.exit_code));
        }
        parse_df(&result.stdout).ok_or_else(|| format!("unexpected df output: {:?}", result.stdout.trim()))
    }
}

#[async_trait]
impl Job for DiskSpaceMonitor {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> JobKind {
        JobKind::Background
    }

    async fn validate(&self, ctx: &JobContext) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for host in [HostRole::Source, HostRole::Target] {
            match self.sample(ctx, host).await {
                Ok(usage) if !self.config.preflight_minimum.is_satisfied(usage.free, usage.total) => {
                    errors.push(ValidationError::new(
                        NAME,
                        Some(host),
                        format!(
                            "{} on {}; at least {} is required to start",
                            usage.describe(),
                            self.config.mount_point,
                            self.config.preflight_minimum
                        ),
                    ));
                }
                Ok(usage) => ctx
                    .log
                    .on_host(host)
                    .full(format!("preflight: {} on {}", usage.describe(), self.config.mount_point)),
                Err(message) => errors.push(ValidationError::new(NAME, Some(host), message)),
            }
        }
        errors
    }

    /// Sample until cancelled. Falling below the runtime minimum raises a
    /// fatal interrupt and ends the monitor.
    async fn execute(&self, ctx: &JobContext, cancel: &CancellationToken) -> Result<(), JobError> {
        let interval = Duration::from_secs(self.config.check_interval.max(1));
        let mut warned = [false, false];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(JobError::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }

            for (slot, host) in [HostRole::Source, HostRole::Target].into_iter().enumerate() {
                let log = ctx.log.on_host(host);
                let usage = match self.sample(ctx, host).await {
                    Ok(usage) => usage,
                    Err(message) => {
                        log.warning(format!("could not sample disk usage: {message}"));
                        continue;
                    }
                };
                log.debug(usage.describe());

                if !self.config.runtime_minimum.is_satisfied(usage.free, usage.total) {
                    let reason = format!(
                        "{} on {} ({}), below the runtime minimum of {}",
                        usage.describe(),
                        self.config.mount_point,
                        ctx.hostname(host),
                        self.config.runtime_minimum
                    );
                    log.event(Level::Critical, format!("disk space critical: {reason}"))
                        .with("free_bytes", usage.free)
                        .with("total_bytes", usage.total)
                        .send();
                    ctx.interrupts.fatal(NAME, reason.clone());
                    return Err(JobError::Failed(reason));
                }

                let low = !self.config.warning_threshold.is_satisfied(usage.free, usage.total);
                if low && !warned[slot] {
                    log.event(Level::Warning, "free space below warning threshold")
                        .with("free", format_bytes(usage.free))
                        .with("threshold", self.config.warning_threshold.to_string())
                        .send();
                }
                warned[slot] = low;
            }
        }
    }
}
