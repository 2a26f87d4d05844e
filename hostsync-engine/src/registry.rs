//! Job registry: name → descriptor (schema + factory).

use std::collections::BTreeMap;

use hostsync_core::{ConfigError, Configuration};
use hostsync_log::Logger;

use crate::job::{JobDescriptor, JobKind};
use crate::jobs::{disk_monitor, dummy, install, snapshot};
use crate::jobs::{DiskSpaceMonitor, DummyJob, InstallJob, SnapshotJob};

/// System and background jobs the orchestrator sequences itself.
pub const INSTALL_JOB: &str = install::NAME;
pub const PRE_SNAPSHOT_JOB: &str = snapshot::PRE_NAME;
pub const POST_SNAPSHOT_JOB: &str = snapshot::POST_NAME;
pub const MONITOR_JOB: &str = disk_monitor::NAME;

#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: BTreeMap<String, JobDescriptor>,
}

impl JobRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every job shipped with the engine.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(
            JobDescriptor::new(INSTALL_JOB, JobKind::System, install::schema, InstallJob::create)
                .with_section(install::SECTION),
        );
        registry.register(
            JobDescriptor::new(PRE_SNAPSHOT_JOB, JobKind::System, snapshot::schema, SnapshotJob::pre)
                .with_section(snapshot::SECTION),
        );
        registry.register(
            JobDescriptor::new(POST_SNAPSHOT_JOB, JobKind::System, snapshot::schema, SnapshotJob::post)
                .with_section(snapshot::SECTION),
        );
        registry.register(JobDescriptor::new(
            MONITOR_JOB,
            JobKind::Background,
            disk_monitor::schema,
            DiskSpaceMonitor::create,
        ));
        registry.register(JobDescriptor::new(
            dummy::SUCCESS_NAME,
            JobKind::Sync,
            dummy::success_schema,
            DummyJob::success,
        ));
        registry.register(JobDescriptor::new(
            dummy::FAIL_NAME,
            JobKind::Sync,
            dummy::fail_schema,
            DummyJob::fail,
        ));
        registry
    }

    /// Add a job, replacing any existing job of the same name.
    pub fn register(&mut self, descriptor: JobDescriptor) -> &mut Self {
        self.jobs.insert(descriptor.name.clone(), descriptor);
        self
    }

    pub fn get(&self, name: &str) -> Option<&JobDescriptor> {
        self.jobs.get(name)
    }

    /// Every configuration problem, without touching a host: unknown or
    /// misplaced `sync_jobs` entries, unknown sections, and schema errors
    /// for every section a job of this run will read.
    pub fn check(&self, config: &Configuration) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        for entry in &config.sync_jobs {
            match self.get(&entry.name) {
                None => errors.push(ConfigError::UnknownJob {
                    name: entry.name.clone(),
                }),
                Some(d) if d.kind != JobKind::Sync => errors.push(ConfigError::SystemJobListed {
                    name: entry.name.clone(),
                }),
                Some(_) => {}
            }
        }

        for section in config.section_names() {
            if !self.jobs.values().any(|d| d.section == section) {
                errors.push(ConfigError::UnknownSection {
                    section: section.to_owned(),
                });
            }
        }

        let mut checked: Vec<&str> = Vec::new();
        for descriptor in self.jobs.values() {
            let active = match descriptor.kind {
                JobKind::Sync => config.enabled_sync_jobs().any(|n| n == descriptor.name),
                JobKind::System | JobKind::Background => true,
            };
            if !active || checked.contains(&descriptor.section.as_str()) {
                continue;
            }
            checked.push(&descriptor.section);
            errors.extend(descriptor.validate_config(config.section(&descriptor.section)));
        }
        errors
    }

    /// [`check`](Self::check), logging each problem as an error on `log`.
    pub fn check_logged(&self, config: &Configuration, log: &Logger) -> Vec<ConfigError> {
        let errors = self.check(config);
        for error in &errors {
            log.error(error.to_string());
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn config(text: &str) -> Configuration {
        Configuration::from_yaml_str(text, Path::new("test.yaml")).unwrap()
    }

    #[test]
    fn default_config_is_valid() {
        let config = config(hostsync_core::config::DEFAULT_CONFIG);
        let errors = JobRegistry::builtin().check(&config);
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn unknown_and_system_jobs_are_rejected() {
        let errors = JobRegistry::builtin().check(&config(
            "sync_jobs:\n  packages: true\n  btrfs_snapshots_pre: true\n",
        ));
        let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
        assert!(messages.contains(&"unknown job 'packages' in sync_jobs".to_owned()));
        assert!(messages.iter().any(|m| m.contains("'btrfs_snapshots_pre' is a system job")));
    }

    #[test]
    fn disabled_job_sections_are_not_schema_checked() {
        let errors = JobRegistry::builtin().check(&config(
            "sync_jobs:\n  dummy_fail: false\ndummy_fail:\n  fail_at_percent: 500\n",
        ));
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn enabled_job_sections_are_schema_checked() {
        let errors = JobRegistry::builtin().check(&config(
            "sync_jobs:\n  dummy_fail: true\ndummy_fail:\n  fail_at_percent: 500\n",
        ));
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ConfigError::OutOfRange { .. }));
    }

    #[test]
    fn typo_in_section_name_is_reported() {
        let errors = JobRegistry::builtin().check(&config("btrfs_snapshot:\n  sudo: false\n"));
        assert!(matches!(&errors[0], ConfigError::UnknownSection { section } if section == "btrfs_snapshot"));
    }
}
