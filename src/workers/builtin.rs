use super::{Worker, WorkerContext, config_str, config_u64};
use crate::errors::WorkerError;
use async_trait::async_trait;
use std::time::Duration;
use stepchain_common::{TaskOutcome, WorkerConfig};

/// Succeeds immediately and echoes its config back as outcome data.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWorker;

#[async_trait]
impl Worker for NoopWorker {
    fn kind(&self) -> &str {
        "noop"
    }

    fn description(&self) -> &str {
        "Succeed immediately, echoing the config as data"
    }

    async fn run(
        &self,
        _ctx: &WorkerContext,
        config: &WorkerConfig,
    ) -> Result<TaskOutcome, WorkerError> {
        Ok(TaskOutcome::success().with_data(serde_json::Value::Object(config.clone())))
    }
}

/// Sleeps for `duration_ms`, reporting progress in quarters.
#[derive(Debug, Default, Clone, Copy)]
pub struct SleepWorker;

#[async_trait]
impl Worker for SleepWorker {
    fn kind(&self) -> &str {
        "sleep"
    }

    fn description(&self) -> &str {
        "Wait for duration_ms milliseconds"
    }

    async fn run(
        &self,
        ctx: &WorkerContext,
        config: &WorkerConfig,
    ) -> Result<TaskOutcome, WorkerError> {
        let duration_ms = config_u64(config, "duration_ms")?
            .ok_or_else(|| WorkerError::InvalidConfig("'duration_ms' is required".to_string()))?;

        let slice = Duration::from_millis(duration_ms / 4);
        for quarter in 1..=4u8 {
            tokio::time::sleep(slice).await;
            ctx.report_progress(quarter * 25, None);
        }
        Ok(TaskOutcome::success().with_message(format!("Slept {}ms", duration_ms)))
    }
}

/// Always fails, with `message` or a default reason.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailWorker;

#[async_trait]
impl Worker for FailWorker {
    fn kind(&self) -> &str {
        "fail"
    }

    fn description(&self) -> &str {
        "Fail with the configured message"
    }

    async fn run(
        &self,
        _ctx: &WorkerContext,
        config: &WorkerConfig,
    ) -> Result<TaskOutcome, WorkerError> {
        let message = config_str(config, "message").unwrap_or("Task failed as configured");
        Ok(TaskOutcome::failure(message))
    }
}
