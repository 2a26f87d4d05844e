//! Reference sync jobs for smoke runs and tests.
//!
//! Each job steps through a configured number of seconds per host, one
//! tracked `sleep 1` process per step, emitting progress as it goes.

use std::sync::Arc;

use async_trait::async_trait;
use hostsync_core::{ConfigError, ConfigSchema, FieldType, HostRole, ProgressUpdate};
use hostsync_exec::ProcessHandle;
use hostsync_log::Logger;
use serde::Deserialize;
use serde_yaml::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{JobError, ValidationError};
use crate::job::{typed_config, Job, JobContext, JobKind};

pub const SUCCESS_NAME: &str = "dummy_success";
pub const FAIL_NAME: &str = "dummy_fail";

const STEP_COMMAND: &str = "sleep 1";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuccessConfig {
    pub source_duration: u64,
    pub target_duration: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FailConfig {
    pub fail_at_percent: u8,
    pub duration: u64,
}

pub fn success_schema() -> ConfigSchema {
    ConfigSchema::empty()
        .optional("source_duration", FieldType::integer(0, 3600), 20, "seconds of work on the source")
        .optional("target_duration", FieldType::integer(0, 3600), 20, "seconds of work on the target")
}

pub fn fail_schema() -> ConfigSchema {
    ConfigSchema::empty()
        .optional("fail_at_percent", FieldType::integer(0, 100), 60, "progress at which the job fails")
        .optional("duration", FieldType::integer(1, 3600), 10, "seconds of work on the source")
}

/// Steps on each host, and where (if anywhere) to fail.
pub struct DummyJob {
    name: &'static str,
    plan: Vec<(HostRole, u64)>,
    fail_at_percent: Option<u8>,
}

impl DummyJob {
    pub fn success(raw: &Value) -> Result<Arc<dyn Job>, ConfigError> {
        let config: SuccessConfig = typed_config(SUCCESS_NAME, raw)?;
        Ok(Arc::new(Self {
            name: SUCCESS_NAME,
            plan: vec![
                (HostRole::Source, config.source_duration),
                (HostRole::Target, config.target_duration),
            ],
            fail_at_percent: None,
        }))
    }

    pub fn fail(raw: &Value) -> Result<Arc<dyn Job>, ConfigError> {
        let config: FailConfig = typed_config(FAIL_NAME, raw)?;
        Ok(Arc::new(Self {
            name: FAIL_NAME,
            plan: vec![(HostRole::Source, config.duration)],
            fail_at_percent: Some(config.fail_at_percent),
        }))
    }

}

/// Kill and reap the running step. Other processes on the host are left
/// alone.
async fn abandon(log: &Logger, step: &mut ProcessHandle) -> JobError {
    if let Err(e) = step.kill().await {
        log.warning(format!("failed to kill '{}': {e}", step.command()));
    }
    let _ = step.wait().await;
    log.warning("cancelled; terminated running step");
    JobError::Cancelled
}

#[async_trait]
impl Job for DummyJob {
    fn name(&self) -> &str {
        self.name
    }

    fn kind(&self) -> JobKind {
        JobKind::Sync
    }

    async fn validate(&self, ctx: &JobContext) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for (host, _) in &self.plan {
            match ctx.executor(*host).run_command("command -v sleep", ctx.command_timeout).await {
                Ok(result) if result.success() => {}
                Ok(_) => errors.push(ValidationError::new(self.name, Some(*host), "sleep is not available")),
                Err(e) => errors.push(ValidationError::new(self.name, Some(*host), e.to_string())),
            }
        }
        errors
    }

    async fn execute(&self, ctx: &JobContext, cancel: &CancellationToken) -> Result<(), JobError> {
        for (host, steps) in &self.plan {
            let exec = ctx.executor(*host);
            let log = ctx.log.on_host(*host);
            log.info(format!("working on {} for {steps}s", ctx.hostname(*host)));

            for step in 1..=*steps {
                if cancel.is_cancelled() {
                    log.warning("cancelled");
                    return Err(JobError::Cancelled);
                }
                let mut running = exec.start_process(STEP_COMMAND).await?;
                let finished = tokio::select! {
                    result = running.wait() => Some(result?),
                    _ = cancel.cancelled() => None,
                };
                let Some(result) = finished else {
                    return Err(abandon(&log, &mut running).await);
                };
                if !result.success() {
                    return Err(JobError::command(STEP_COMMAND, &result));
                }

                let update = ProgressUpdate::counter(step, *steps).with_label(format!("step {step}/{steps}"));
                let percent = update.percent.unwrap_or(100);
                log.progress(update);
                log.full(format!("step {step} of {steps} done"));

                if let Some(fail_at) = self.fail_at_percent {
                    if percent >= fail_at {
                        let message = format!("simulated failure at {percent}%");
                        log.error(message.clone());
                        return Err(JobError::Failed(message));
                    }
                }
            }
        }
        ctx.log.info("done");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;
    use hostsync_core::SessionId;
    use hostsync_exec::{Executor, FakeExecutor, FakeResponse};

    fn context(source: &FakeExecutor, target: &FakeExecutor) -> JobContext {
        let (interrupts, _) = crate::interrupt::channel();
        JobContext {
            config: Value::Null,
            source: Arc::new(source.clone()),
            target: Arc::new(target.clone()),
            log: Logger::detached(SUCCESS_NAME),
            session: SessionId::from("d1d2d3d4"),
            source_hostname: "laptop".into(),
            target_hostname: "desktop".into(),
            run_started: Utc::now(),
            version: "0.1.0".parse().unwrap(),
            command_timeout: None,
            interrupts,
        }
    }

    #[tokio::test]
    async fn cancel_kills_only_the_running_step() {
        let source = FakeExecutor::new(HostRole::Source, "laptop");
        let target = FakeExecutor::new(HostRole::Target, "desktop");
        source.on(STEP_COMMAND, FakeResponse::Hang).on("df -P", FakeResponse::Hang);
        let ctx = context(&source, &target);
        let raw: Value = serde_yaml::from_str("source_duration: 3\ntarget_duration: 0\n").unwrap();
        let job = DummyJob::success(&raw).unwrap();

        // Stands in for the disk monitor's df, started outside the job.
        let mut df = source.start_process("df -P /").await.unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let watcher = source.clone();
        tokio::spawn(async move {
            while watcher.tracked_processes() < 2 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            trigger.cancel();
        });

        let result = job.execute(&ctx, &cancel).await;

        assert!(matches!(result, Err(JobError::Cancelled)));
        assert_eq!(source.terminations(), 0);
        assert_eq!(target.terminations(), 0);
        assert_eq!(source.tracked_processes(), 1);
        df.kill().await.unwrap();
        assert_eq!(df.wait().await.unwrap().exit_code, 143);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_job_stops_at_the_configured_percent() {
        let source = FakeExecutor::new(HostRole::Source, "laptop");
        let target = FakeExecutor::new(HostRole::Target, "desktop");
        let ctx = context(&source, &target);
        let raw: Value = serde_yaml::from_str("fail_at_percent: 50\nduration: 4\n").unwrap();
        let job = DummyJob::fail(&raw).unwrap();

        let err = job.execute(&ctx, &CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.to_string(), "simulated failure at 50%");
        assert_eq!(source.calls().len(), 2);
    }
}
