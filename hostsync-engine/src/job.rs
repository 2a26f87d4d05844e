//! The job contract.
//!
//! A job is validated once (read-only) and executed once (mutating) per run.
//! Jobs are built by a [`JobDescriptor`] factory from their config section
//! after that section has passed the descriptor's schema.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hostsync_core::{ConfigError, ConfigSchema, HostRole, SessionId, Snapshot, Version};
use hostsync_exec::Executor;
use hostsync_log::Logger;
use serde::de::DeserializeOwned;
use serde_yaml::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{JobError, ValidationError};
use crate::interrupt::InterruptSender;

/// How the orchestrator treats a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Always active, sequenced by the orchestrator, not user-configurable.
    System,
    /// Enabled in `sync_jobs`, run in configuration order.
    Sync,
    /// Runs concurrently with the sync sequence.
    Background,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::System => write!(f, "system"),
            JobKind::Sync => write!(f, "sync"),
            JobKind::Background => write!(f, "background"),
        }
    }
}

/// Everything a job may use during one run. Read-only once built.
#[derive(Clone)]
pub struct JobContext {
    /// The job's config section, schema-checked and with defaults applied.
    pub config: Value,
    pub source: Arc<dyn Executor>,
    pub target: Arc<dyn Executor>,
    /// Logger tagged with the job's name.
    pub log: Logger,
    pub session: SessionId,
    pub source_hostname: String,
    pub target_hostname: String,
    pub run_started: DateTime<Utc>,
    /// Version of the running orchestrator.
    pub version: Version,
    /// Default timeout for one-shot commands.
    pub command_timeout: Option<Duration>,
    /// Raises interrupts into the orchestrator (used by background jobs).
    pub interrupts: InterruptSender,
}

impl JobContext {
    pub fn executor(&self, role: HostRole) -> &Arc<dyn Executor> {
        match role {
            HostRole::Source => &self.source,
            HostRole::Target => &self.target,
        }
    }

    pub fn hostname(&self, role: HostRole) -> &str {
        match role {
            HostRole::Source => &self.source_hostname,
            HostRole::Target => &self.target_hostname,
        }
    }

    /// Same run, different job: new config and logger tag.
    pub fn for_job(&self, job: &str, config: Value) -> Self {
        Self {
            config,
            log: self.log.with_job(job),
            ..self.clone()
        }
    }
}

#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> JobKind;

    /// Read-only precondition checks against live hosts. Returns every
    /// violation found.
    async fn validate(&self, ctx: &JobContext) -> Vec<ValidationError>;

    /// Do the work. When `cancel` fires the job cleans up what it started
    /// and returns [`JobError::Cancelled`].
    async fn execute(&self, ctx: &JobContext, cancel: &CancellationToken) -> Result<(), JobError>;

    /// Snapshots this job created, for jobs that create any.
    fn snapshots(&self) -> Vec<Snapshot> {
        Vec::new()
    }
}

/// Builds a job from its (validated, defaulted) config section.
pub type JobFactory = Arc<dyn Fn(&Value) -> Result<Arc<dyn Job>, ConfigError> + Send + Sync>;

/// Registry entry: name, kind, schema and factory for one job.
#[derive(Clone)]
pub struct JobDescriptor {
    pub name: String,
    pub kind: JobKind,
    /// Config section read by the job; usually its own name.
    pub section: String,
    schema: fn() -> ConfigSchema,
    factory: JobFactory,
}

impl JobDescriptor {
    pub fn new<F>(name: impl Into<String>, kind: JobKind, schema: fn() -> ConfigSchema, factory: F) -> Self
    where
        F: Fn(&Value) -> Result<Arc<dyn Job>, ConfigError> + Send + Sync + 'static,
    {
        let name = name.into();
        Self {
            section: name.clone(),
            name,
            kind,
            schema,
            factory: Arc::new(factory),
        }
    }

    /// Read config from `section` instead of the job's own name.
    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = section.into();
        self
    }

    pub fn declared_schema(&self) -> ConfigSchema {
        (self.schema)()
    }

    /// Check a raw section against the declared schema. Touches no host.
    pub fn validate_config(&self, raw: &Value) -> Vec<ConfigError> {
        self.declared_schema().validate(&self.section, raw)
    }

    /// Apply schema defaults and build the job. Call after
    /// [`validate_config`](Self::validate_config) returned nothing.
    pub fn instantiate(&self, raw: &Value) -> Result<(Value, Arc<dyn Job>), ConfigError> {
        let config = self.declared_schema().with_defaults(raw);
        let job = (self.factory)(&config)?;
        Ok((config, job))
    }
}

impl fmt::Debug for JobDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("section", &self.section)
            .finish()
    }
}

/// Deserialize a defaulted config section into a job's typed config.
pub fn typed_config<T: DeserializeOwned>(section: &str, config: &Value) -> Result<T, ConfigError> {
    serde_yaml::from_value(config.clone()).map_err(|e| ConfigError::InvalidValue {
        section: section.to_owned(),
        key: "<section>".to_owned(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostsync_core::FieldType;

    struct Noop;

    #[async_trait]
    impl Job for Noop {
        fn name(&self) -> &str {
            "noop"
        }
        fn kind(&self) -> JobKind {
            JobKind::Sync
        }
        async fn validate(&self, _ctx: &JobContext) -> Vec<ValidationError> {
            Vec::new()
        }
        async fn execute(&self, _ctx: &JobContext, _cancel: &CancellationToken) -> Result<(), JobError> {
            Ok(())
        }
    }

    fn noop_descriptor(schema: fn() -> ConfigSchema) -> JobDescriptor {
        JobDescriptor::new("noop", JobKind::Sync, schema, |_| Ok(Arc::new(Noop) as Arc<dyn Job>))
    }

    #[test]
    fn empty_schema_accepts_empty_config_and_rejects_extra_keys() {
        let descriptor = noop_descriptor(ConfigSchema::empty);
        assert!(descriptor.validate_config(&Value::Null).is_empty());
        let empty: Value = serde_yaml::from_str("{}").unwrap();
        assert!(descriptor.validate_config(&empty).is_empty());

        let extra: Value = serde_yaml::from_str("surprise: 1").unwrap();
        let errors = descriptor.validate_config(&extra);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].to_string(), "'noop': unexpected key 'surprise'");
    }

    #[test]
    fn instantiate_applies_defaults() {
        fn schema() -> ConfigSchema {
            ConfigSchema::empty().optional("steps", FieldType::integer(0, 10), 3, "steps")
        }
        let descriptor = noop_descriptor(schema);
        let (config, job) = descriptor.instantiate(&Value::Null).unwrap();
        assert_eq!(config["steps"], 3);
        assert_eq!(job.name(), "noop");
    }

    #[test]
    fn validation_error_display_includes_host() {
        let err = ValidationError::new("btrfs_snapshots_pre", Some(HostRole::Target), "no /.snapshots");
        assert_eq!(err.to_string(), "[btrfs_snapshots_pre] (target) no /.snapshots");
    }
}
